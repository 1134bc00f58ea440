//! Streaming XYZ / TRJ trajectory I/O.
//!
//! The reader yields one [`Molecule`] per frame without loading the file
//! into memory. A frame is the usual XYZ block: atom count, comment line
//! (parsed for an energy if it contains a bare number or an `Energy = x`
//! token), then one `Sym x y z` line per atom. The writer appends frames to
//! trajectory files, which is how every output of the scanner and the MD
//! engine is produced.

use crate::core::models::{Element, Molecule};
use nalgebra::Point3;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XyzError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Line {line}: expected an atom count, found '{content}'")]
    BadAtomCount { line: usize, content: String },

    #[error("Line {line}: malformed atom record '{content}'")]
    BadAtomLine { line: usize, content: String },

    #[error("Line {line}: unknown element '{symbol}'")]
    UnknownElement { line: usize, symbol: String },

    #[error("Unexpected end of file inside a frame starting at line {frame_start}")]
    TruncatedFrame { frame_start: usize },

    #[error("File '{0}' is not an XYZ-family trajectory (.xyz or .trj)")]
    UnsupportedExtension(String),
}

/// Returns whether a path looks like an XYZ-family trajectory.
pub fn is_xyz_family(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("xyz") | Some("trj")
    )
}

/// Streaming frame iterator over an XYZ trajectory.
pub struct XyzReader<R: BufRead> {
    reader: R,
    line_number: usize,
    frame_index: usize,
    done: bool,
}

impl XyzReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, XyzError> {
        let path = path.as_ref();
        if !is_xyz_family(path) {
            return Err(XyzError::UnsupportedExtension(
                path.display().to_string(),
            ));
        }
        Ok(XyzReader::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> XyzReader<R> {
    pub fn new(reader: R) -> Self {
        XyzReader {
            reader,
            line_number: 0,
            frame_index: 0,
            done: false,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, XyzError> {
        let mut buf = String::new();
        let read = self.reader.read_line(&mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        Ok(Some(buf.trim_end().to_string()))
    }

    fn read_frame(&mut self) -> Result<Option<Molecule>, XyzError> {
        // skip blank separator lines between frames
        let count_line = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
            }
        };
        let frame_start = self.line_number;

        let atom_count: usize =
            count_line
                .trim()
                .parse()
                .map_err(|_| XyzError::BadAtomCount {
                    line: frame_start,
                    content: count_line.clone(),
                })?;

        let comment = self
            .next_line()?
            .ok_or(XyzError::TruncatedFrame { frame_start })?;

        let mut elements = Vec::with_capacity(atom_count);
        let mut positions = Vec::with_capacity(atom_count);
        for _ in 0..atom_count {
            let line = self
                .next_line()?
                .ok_or(XyzError::TruncatedFrame { frame_start })?;
            let mut parts = line.split_whitespace();
            let symbol = parts.next().ok_or_else(|| XyzError::BadAtomLine {
                line: self.line_number,
                content: line.clone(),
            })?;
            let element =
                Element::from_symbol(symbol).ok_or_else(|| XyzError::UnknownElement {
                    line: self.line_number,
                    symbol: symbol.to_string(),
                })?;
            let coords: Vec<f64> = parts
                .take(3)
                .map(|t| t.parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| XyzError::BadAtomLine {
                    line: self.line_number,
                    content: line.clone(),
                })?;
            if coords.len() != 3 {
                return Err(XyzError::BadAtomLine {
                    line: self.line_number,
                    content: line,
                });
            }
            elements.push(element);
            positions.push(Point3::new(coords[0], coords[1], coords[2]));
        }

        let mut molecule =
            Molecule::new(elements, positions).with_name(format!("frame_{}", self.frame_index));
        if let Some(energy) = parse_energy(&comment) {
            molecule.set_energy(energy);
        }
        self.frame_index += 1;
        Ok(Some(molecule))
    }
}

/// Extracts an energy from an XYZ comment line: either the first bare
/// floating-point token, or the value following an `Energy =`-style key.
fn parse_energy(comment: &str) -> Option<f64> {
    let tokens: Vec<&str> = comment.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.eq_ignore_ascii_case("energy")
            || token.eq_ignore_ascii_case("energy:")
            || token.eq_ignore_ascii_case("energy=")
        {
            for candidate in &tokens[i + 1..] {
                if let Ok(v) = candidate.trim_start_matches('=').parse::<f64>() {
                    return Some(v);
                }
            }
        }
    }
    tokens.iter().find_map(|t| t.parse::<f64>().ok())
}

impl<R: BufRead> Iterator for XyzReader<R> {
    type Item = Result<Molecule, XyzError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(mol)) => Some(Ok(mol)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Append-oriented XYZ writer for trajectory outputs.
pub struct XyzWriter {
    writer: BufWriter<File>,
}

impl XyzWriter {
    /// Opens in append mode, creating the file when missing.
    pub fn append(path: impl AsRef<Path>) -> Result<XyzWriter, XyzError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(XyzWriter {
            writer: BufWriter::new(file),
        })
    }

    /// Truncates any existing file so the trajectory starts empty.
    pub fn create(path: impl AsRef<Path>) -> Result<XyzWriter, XyzError> {
        let file = File::create(path)?;
        Ok(XyzWriter {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_frame(&mut self, molecule: &Molecule) -> Result<(), XyzError> {
        writeln!(self.writer, "{}", molecule.atom_count())?;
        match molecule.energy() {
            Some(e) => writeln!(self.writer, "{:.10} {}", e, molecule.name())?,
            None => writeln!(self.writer, "{}", molecule.name())?,
        }
        for (element, position) in molecule.elements().iter().zip(molecule.positions()) {
            writeln!(
                self.writer,
                "{:<3} {:>15.8} {:>15.8} {:>15.8}",
                element.symbol(),
                position.x,
                position.y,
                position.z
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// One-shot convenience: append a single frame to `path`.
pub fn append_frame(path: impl AsRef<Path>, molecule: &Molecule) -> Result<(), XyzError> {
    XyzWriter::append(path)?.write_frame(molecule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_WATERS: &str = "3\n-76.40 first\nO 0.0 0.0 0.0\nH 0.9572 0.0 0.0\nH -0.24 0.9266 0.0\n3\nEnergy = -76.39\nO 0.0 0.0 1.0\nH 0.9572 0.0 1.0\nH -0.24 0.9266 1.0\n";

    #[test]
    fn reader_yields_every_frame_with_energies() {
        let frames: Vec<Molecule> = XyzReader::new(Cursor::new(TWO_WATERS))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].atom_count(), 3);
        assert!((frames[0].energy().unwrap() + 76.40).abs() < 1e-9);
        assert!((frames[1].energy().unwrap() + 76.39).abs() < 1e-9);
        assert_eq!(frames[1].positions()[0].z, 1.0);
    }

    #[test]
    fn reader_skips_blank_lines_between_frames() {
        let text = format!("\n{}\n\n", TWO_WATERS);
        let frames: Vec<Molecule> = XyzReader::new(Cursor::new(text))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn truncated_frame_is_an_error_not_a_panic() {
        let text = "3\ncomment\nO 0.0 0.0 0.0\n";
        let result: Result<Vec<Molecule>, _> = XyzReader::new(Cursor::new(text)).collect();
        assert!(matches!(result, Err(XyzError::TruncatedFrame { .. })));
    }

    #[test]
    fn unknown_element_is_reported_with_its_line() {
        let text = "1\ncomment\nQq 0.0 0.0 0.0\n";
        let result: Result<Vec<Molecule>, _> = XyzReader::new(Cursor::new(text)).collect();
        match result {
            Err(XyzError::UnknownElement { line, symbol }) => {
                assert_eq!(line, 3);
                assert_eq!(symbol, "Qq");
            }
            other => panic!("expected UnknownElement, got {:?}", other),
        }
    }

    #[test]
    fn writer_round_trips_through_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xyz");

        let mut mol = Molecule::new(
            vec![Element::OXYGEN, Element::HYDROGEN],
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.97, 0.0, 0.0)],
        )
        .with_name("probe");
        mol.set_energy(-1.5);

        append_frame(&path, &mol).unwrap();
        append_frame(&path, &mol).unwrap();

        let frames: Vec<Molecule> = XyzReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert!((frames[0].energy().unwrap() + 1.5).abs() < 1e-9);
        assert!((frames[1].positions()[1].x - 0.97).abs() < 1e-9);
    }

    #[test]
    fn open_rejects_non_xyz_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "nope").unwrap();
        assert!(matches!(
            XyzReader::open(&path),
            Err(XyzError::UnsupportedExtension(_))
        ));
    }
}
