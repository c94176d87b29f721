//! Reading and writing NRRD (nearly raw raster data) archives.
//!
//! Only what the segmentation hand-off needs is supported: 8-bit unsigned
//! voxels, `raw` encoding with the data attached after the header, a 3D
//! patient space with `space directions` and `space origin`, and free-form
//! `key:=value` metadata. Headers of other pixel types can still be parsed,
//! which is enough to classify such files.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::Vector3;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use thiserror::Error;

use crate::common::Geometry;

/// Magic line written at the top of every archive.
pub const MAGIC: &str = "NRRD0004";

/// Type names NRRD accepts for 8-bit unsigned voxels.
const UINT8_TYPES: [&str; 4] = ["uchar", "unsigned char", "uint8", "uint8_t"];

const LPS: &str = "left-posterior-superior";
const RAS: &str = "right-anterior-superior";

/// Errors that can occur while reading or writing an archive.
#[derive(Error, Debug)]
pub enum NrrdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not a NRRD file: missing magic line")]
    MissingMagic,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidField { field: String, value: String },

    #[error("unsupported pixel type '{0}'")]
    UnsupportedType(String),

    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error("detached data files are not supported")]
    DetachedData,

    #[error("expected {expected} bytes of voxel data, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("found data past the {expected} bytes of voxel data")]
    TrailingData { expected: usize },

    #[error("image must have at least 3 axes, found {0}")]
    TooFewAxes(usize),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl NrrdError {
    fn invalid(field: &str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NrrdError>;

/// The parsed header of an archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NrrdHeader {
    pub pixel_type: String,
    pub sizes: Vec<usize>,
    pub space: Option<String>,
    pub space_directions: Vec<Option<Vector3<f64>>>,
    pub space_origin: Option<Vector3<f64>>,
    pub spacings: Vec<f64>,
    pub kinds: Vec<String>,
    pub encoding: String,
    pub key_values: Vec<(String, String)>,
    detached: bool,
    // a non-zero `byte skip` or `line skip`, rejected when reading voxels
    skip: Option<(String, String)>,
}

impl NrrdHeader {
    pub fn is_uint8(&self) -> bool {
        UINT8_TYPES.contains(&self.pixel_type.as_str())
    }

    /// Number of voxels described by `sizes`, or an error when the product
    /// overflows `usize`.
    pub fn voxel_count(&self) -> Result<usize> {
        self.sizes
            .iter()
            .try_fold(1usize, |count, &size| count.checked_mul(size))
            .ok_or_else(|| NrrdError::invalid("sizes", join(&self.sizes)))
    }

    /// The voxel grid placement in LPS space.
    pub fn geometry(&self) -> Result<Geometry> {
        let flip = match self.space.as_deref() {
            Some(RAS) | Some("RAS") => Vector3::new(-1.0, -1.0, 1.0),
            _ => Vector3::new(1.0, 1.0, 1.0),
        };
        let origin = self
            .space_origin
            .map(|o| o.component_mul(&flip))
            .unwrap_or_else(Vector3::zeros);

        if self.space_directions.is_empty() {
            let mut geometry = Geometry {
                origin,
                ..Geometry::default()
            };
            for (i, spacing) in self
                .spacings
                .iter()
                .filter(|s| s.is_finite())
                .take(3)
                .enumerate()
            {
                geometry.spacing[i] = *spacing;
            }
            return Ok(geometry);
        }

        let axes: Vec<Vector3<f64>> = self
            .space_directions
            .iter()
            .flatten()
            .map(|axis| axis.component_mul(&flip))
            .collect();
        if axes.len() != 3 {
            return Err(NrrdError::invalid(
                "space directions",
                format!("expected 3 spatial axes, found {}", axes.len()),
            ));
        }
        Ok(Geometry::from_space_directions(
            [axes[0], axes[1], axes[2]],
            origin,
        ))
    }

    fn parse<R: BufRead>(reader: &mut R) -> Result<Self> {
        let magic = next_line(reader)?.ok_or(NrrdError::MissingMagic)?;
        if !magic.starts_with("NRRD000") {
            return Err(NrrdError::MissingMagic);
        }

        let mut header = NrrdHeader {
            encoding: "raw".to_string(),
            ..Default::default()
        };
        let mut dimension = None;
        while let Some(line) = next_line(reader)? {
            if line.is_empty() {
                break;
            }
            if line.starts_with('#') {
                continue;
            }
            match split_line(&line) {
                Some(Line::KeyValue(key, value)) => header
                    .key_values
                    .push((unescape(key), unescape(value))),
                Some(Line::Field(field, value)) => {
                    header.apply_field(field, value, &mut dimension)?
                }
                None => return Err(NrrdError::invalid("header line", line.clone())),
            }
        }

        if header.pixel_type.is_empty() {
            return Err(NrrdError::MissingField("type"));
        }
        if header.sizes.is_empty() {
            return Err(NrrdError::MissingField("sizes"));
        }
        header.voxel_count()?;
        if let Some(dimension) = dimension {
            if dimension != header.sizes.len() {
                return Err(NrrdError::invalid(
                    "sizes",
                    format!("{} sizes for dimension {}", header.sizes.len(), dimension),
                ));
            }
        }
        Ok(header)
    }

    fn apply_field(
        &mut self,
        field: &str,
        value: &str,
        dimension: &mut Option<usize>,
    ) -> Result<()> {
        match field {
            "type" => self.pixel_type = value.to_string(),
            "dimension" => {
                *dimension = Some(
                    value
                        .parse()
                        .map_err(|_| NrrdError::invalid(field, value))?,
                )
            }
            "sizes" => {
                self.sizes = value
                    .split_whitespace()
                    .map(|s| s.parse().map_err(|_| NrrdError::invalid(field, value)))
                    .collect::<Result<_>>()?
            }
            "space" => self.space = Some(value.to_string()),
            "space directions" => self.space_directions = parse_vector_list(field, value)?,
            "space origin" => {
                self.space_origin = parse_vector_list(field, value)?
                    .into_iter()
                    .next()
                    .flatten()
            }
            "spacings" => {
                self.spacings = value
                    .split_whitespace()
                    .map(|s| match s {
                        "nan" | "NaN" => Ok(f64::NAN),
                        _ => s.parse().map_err(|_| NrrdError::invalid(field, value)),
                    })
                    .collect::<Result<_>>()?
            }
            "kinds" => self.kinds = value.split_whitespace().map(str::to_string).collect(),
            "encoding" => self.encoding = value.to_string(),
            "data file" | "datafile" => self.detached = true,
            "byte skip" | "byteskip" | "line skip" | "lineskip" => {
                if value != "0" {
                    self.skip = Some((field.to_string(), value.to_string()));
                }
            }
            // endian is irrelevant for single-byte voxels
            _ => log::debug!("ignoring NRRD field '{}'", field),
        }
        Ok(())
    }
}

/// An 8-bit voxel array with its geometry and metadata.
///
/// The first three axes of `data` are spatial; any further axes are lists
/// (for example one channel per segment).
#[derive(Debug, Clone, PartialEq)]
pub struct NrrdImage {
    pub data: ArrayD<u8>,
    pub geometry: Geometry,
    pub metadata: Vec<(String, String)>,
}

impl NrrdImage {
    pub fn new(data: ArrayD<u8>, geometry: Geometry) -> Self {
        Self {
            data,
            geometry,
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Reads only the header of the archive at `path`.
pub fn read_header(path: &Path) -> Result<NrrdHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    NrrdHeader::parse(&mut reader)
}

/// Reads an 8-bit archive with attached raw data.
pub fn read(path: &Path) -> Result<NrrdImage> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = NrrdHeader::parse(&mut reader)?;

    if !header.is_uint8() {
        return Err(NrrdError::UnsupportedType(header.pixel_type));
    }
    if header.encoding != "raw" {
        return Err(NrrdError::UnsupportedEncoding(header.encoding));
    }
    if header.detached {
        return Err(NrrdError::DetachedData);
    }

    if let Some((field, value)) = &header.skip {
        return Err(NrrdError::invalid(field, value.as_str()));
    }

    let expected = header.voxel_count()?;
    // the buffer grows with the bytes actually present, never with `sizes`
    let mut voxels = Vec::new();
    reader
        .take((expected as u64).saturating_add(1))
        .read_to_end(&mut voxels)?;
    if voxels.len() < expected {
        return Err(NrrdError::Truncated {
            expected,
            found: voxels.len(),
        });
    }
    if voxels.len() > expected {
        return Err(NrrdError::TrailingData { expected });
    }

    // first axis varies fastest on disk
    let data = ArrayD::from_shape_vec(IxDyn(&header.sizes).f(), voxels)?;
    let geometry = header.geometry()?;
    Ok(NrrdImage {
        data,
        geometry,
        metadata: header.key_values,
    })
}

/// Writes `image` as a raw-encoded archive.
pub fn write(path: &Path, image: &NrrdImage) -> Result<()> {
    let ndim = image.data.ndim();
    if ndim < 3 {
        return Err(NrrdError::TooFewAxes(ndim));
    }
    let extra_axes = ndim - 3;

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", MAGIC)?;
    writeln!(out, "# Complete NRRD file format specification at:")?;
    writeln!(out, "# http://teem.sourceforge.net/nrrd/format.html")?;
    writeln!(out, "type: uint8")?;
    writeln!(out, "dimension: {}", ndim)?;
    writeln!(out, "space: {}", LPS)?;
    writeln!(out, "sizes: {}", join(image.data.shape()))?;

    let mut directions: Vec<String> = image
        .geometry
        .space_directions()
        .iter()
        .map(format_vector)
        .collect();
    directions.extend(std::iter::repeat("none".to_string()).take(extra_axes));
    writeln!(out, "space directions: {}", directions.join(" "))?;

    let mut kinds = vec!["domain"; 3];
    kinds.extend(std::iter::repeat("list").take(extra_axes));
    writeln!(out, "kinds: {}", kinds.join(" "))?;
    writeln!(out, "endian: little")?;
    writeln!(out, "encoding: raw")?;
    writeln!(out, "space origin: {}", format_vector(&image.geometry.origin))?;
    for (key, value) in &image.metadata {
        writeln!(out, "{}:={}", escape(key), escape(value))?;
    }
    writeln!(out)?;

    // reversing the axes makes the first original axis the fastest in iteration
    let voxels: Vec<u8> = image.data.t().iter().copied().collect();
    out.write_all(&voxels)?;
    out.flush()?;
    Ok(())
}

enum Line<'a> {
    Field(&'a str, &'a str),
    KeyValue(&'a str, &'a str),
}

fn split_line(line: &str) -> Option<Line<'_>> {
    let field = line.find(": ");
    let key_value = line.find(":=");
    match (field, key_value) {
        (Some(f), Some(kv)) if kv < f => Some(Line::KeyValue(&line[..kv], &line[kv + 2..])),
        (None, Some(kv)) => Some(Line::KeyValue(&line[..kv], &line[kv + 2..])),
        (Some(f), _) => Some(Line::Field(&line[..f], line[f + 2..].trim())),
        (None, None) => None,
    }
}

/// Reads one header line without its terminator, tolerating non-UTF-8 bytes.
fn next_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn parse_vector_list(field: &str, value: &str) -> Result<Vec<Option<Vector3<f64>>>> {
    let mut vectors = Vec::new();
    let mut rest = value.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("none") {
            vectors.push(None);
            rest = after.trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            let close = after
                .find(')')
                .ok_or_else(|| NrrdError::invalid(field, value))?;
            let components = after[..close]
                .split(',')
                .map(|c| c.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| NrrdError::invalid(field, value))?;
            if components.len() != 3 {
                return Err(NrrdError::invalid(field, value));
            }
            vectors.push(Some(Vector3::new(
                components[0],
                components[1],
                components[2],
            )));
            rest = after[close + 1..].trim_start();
        } else {
            return Err(NrrdError::invalid(field, value));
        }
    }
    Ok(vectors)
}

fn format_vector(v: &Vector3<f64>) -> String {
    format!("({},{},{})", v[0], v[1], v[2])
}

fn join(sizes: &[usize]) -> String {
    sizes
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;
    use ndarray::{Array4, Axis};
    use std::fs;
    use tempfile::tempdir;

    fn oblique_geometry() -> Geometry {
        Geometry::new(
            Vector3::new(0.5, 0.75, 2.5),
            Vector3::new(-120.25, 33.0, 7.5),
            Matrix3::new(0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
        )
    }

    fn labelled_grid() -> ArrayD<u8> {
        let mut data = Array4::<u8>::zeros((4, 3, 2, 2));
        data[[0, 0, 0, 0]] = 1;
        data[[3, 2, 1, 0]] = 1;
        data[[1, 2, 0, 1]] = 1;
        data.into_dyn()
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Structures.nrrd");
        let image = NrrdImage::new(labelled_grid(), oblique_geometry())
            .with_metadata("Segment0_Name", "liver")
            .with_metadata("Segment1_Name", "spleen");

        write(&path, &image).unwrap();
        let read_back = read(&path).unwrap();

        assert_eq!(read_back.data, image.data);
        assert!(read_back.geometry.approx_eq(&image.geometry));
        assert_eq!(read_back.metadata, image.metadata);
        assert_eq!(read_back.metadata_value("Segment1_Name"), Some("spleen"));
    }

    #[test]
    fn test_header_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.nrrd");
        let image = NrrdImage::new(labelled_grid(), Geometry::default())
            .with_metadata("Segment0_Name", "A");
        write(&path, &image).unwrap();

        let bytes = fs::read(&path).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "NRRD0004");
        assert!(lines.contains(&"type: uint8"));
        assert!(lines.contains(&"dimension: 4"));
        assert!(lines.contains(&"sizes: 4 3 2 2"));
        assert!(lines.contains(&"space directions: (1,0,0) (0,1,0) (0,0,1) none"));
        assert!(lines.contains(&"kinds: domain domain domain list"));
        assert!(lines.contains(&"Segment0_Name:=A"));
    }

    #[test]
    fn test_first_axis_is_fastest_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("order.nrrd");
        let mut data = ndarray::Array3::<u8>::zeros((2, 2, 1));
        data[[1, 0, 0]] = 7;
        write(&path, &NrrdImage::new(data.into_dyn(), Geometry::default())).unwrap();

        let bytes = fs::read(&path).unwrap();
        let body = &bytes[bytes.len() - 4..];
        assert_eq!(body, &[0, 7, 0, 0]);
    }

    #[test]
    fn test_read_channel_view() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channels.nrrd");
        let image = NrrdImage::new(labelled_grid(), Geometry::default());
        write(&path, &image).unwrap();

        let read_back = read(&path).unwrap();
        let channel = read_back.data.index_axis(Axis(3), 1);
        assert_eq!(channel[[1, 2, 0]], 1);
        assert_eq!(channel.sum(), 1);
    }

    #[test]
    fn test_reads_ras_space_as_lps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ras.nrrd");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            "NRRD0005\ntype: unsigned char\ndimension: 3\nspace: right-anterior-superior\n\
             sizes: 2 1 1\nspace directions: (2, 0, 0) (0,3,0) (0,0,4)\n\
             encoding: raw\nspace origin: (10,20,30)\n\n"
        )
        .unwrap();
        file.write_all(&[1, 0]).unwrap();
        drop(file);

        let image = read(&path).unwrap();
        assert_eq!(image.data.shape(), &[2, 1, 1]);
        assert_eq!(image.geometry.spacing, Vector3::new(2.0, 3.0, 4.0));
        assert_eq!(image.geometry.origin, Vector3::new(-10.0, -20.0, 30.0));
        assert_eq!(image.geometry.direction[(0, 0)], -1.0);
    }

    #[test]
    fn test_header_only_for_other_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ct.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: short\ndimension: 3\nsizes: 1 1 1\nencoding: raw\n\n\0\0",
        )
        .unwrap();

        let header = read_header(&path).unwrap();
        assert!(!header.is_uint8());
        assert!(matches!(read(&path), Err(NrrdError::UnsupportedType(t)) if t == "short"));
    }

    #[test]
    fn test_truncated_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 2 2 2\nencoding: raw\n\n\x01\x02",
        )
        .unwrap();
        assert!(matches!(
            read(&path),
            Err(NrrdError::Truncated {
                expected: 8,
                found: 2
            })
        ));
    }

    #[test]
    fn test_oversized_sizes_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 1000000 1000000 1000000\nencoding: raw\n\n\x01",
        )
        .unwrap();
        assert!(matches!(
            read(&path),
            Err(NrrdError::Truncated { found: 1, .. })
        ));
    }

    #[test]
    fn test_overflowing_sizes_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overflow.nrrd");
        fs::write(
            &path,
            format!(
                "NRRD0004\ntype: uint8\ndimension: 3\nsizes: {} {} 2\nencoding: raw\n\n",
                usize::MAX,
                usize::MAX
            ),
        )
        .unwrap();
        assert!(matches!(
            read_header(&path),
            Err(NrrdError::InvalidField { ref field, .. }) if field == "sizes"
        ));
        assert!(matches!(read(&path), Err(NrrdError::InvalidField { .. })));
    }

    #[test]
    fn test_trailing_data_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 1 1 1\nencoding: raw\n\n\x01\x02",
        )
        .unwrap();
        assert!(matches!(
            read(&path),
            Err(NrrdError::TrailingData { expected: 1 })
        ));
    }

    #[test]
    fn test_skip_fields_are_rejected() {
        let dir = tempdir().unwrap();
        for field in ["byte skip: 4", "line skip: 1"] {
            let path = dir.path().join("skip.nrrd");
            fs::write(
                &path,
                format!(
                    "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 1 1 1\n{}\nencoding: raw\n\n\x01",
                    field
                ),
            )
            .unwrap();
            assert!(read_header(&path).unwrap().is_uint8());
            assert!(
                matches!(read(&path), Err(NrrdError::InvalidField { .. })),
                "{} was accepted",
                field
            );
        }
    }

    #[test]
    fn test_zero_skip_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noskip.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 1 1 1\nbyte skip: 0\nencoding: raw\n\n\x05",
        )
        .unwrap();
        assert_eq!(read(&path).unwrap().data[[0, 0, 0]], 5);
    }

    #[test]
    fn test_missing_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, "hello\n").unwrap();
        assert!(matches!(read_header(&path), Err(NrrdError::MissingMagic)));
    }

    #[test]
    fn test_gzip_encoding_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gz.nrrd");
        fs::write(
            &path,
            "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 1 1 1\nencoding: gzip\n\n",
        )
        .unwrap();
        assert!(matches!(read(&path), Err(NrrdError::UnsupportedEncoding(_))));
    }

    #[test]
    fn test_metadata_escapes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("escaped.nrrd");
        let image = NrrdImage::new(labelled_grid(), Geometry::default())
            .with_metadata("note", "two\nlines \\ slash");
        write(&path, &image).unwrap();
        assert_eq!(read(&path).unwrap().metadata, image.metadata);
    }

    #[test]
    fn test_too_few_axes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.nrrd");
        let flat = ndarray::Array2::<u8>::zeros((2, 2)).into_dyn();
        assert!(matches!(
            write(&path, &NrrdImage::new(flat, Geometry::default())),
            Err(NrrdError::TooFewAxes(2))
        ));
    }
}
