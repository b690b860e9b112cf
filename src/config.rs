use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use crate::errors::{Error, Result};
use crate::iter_parser::{DEFAULT_BUFFER_SIZE, clamp_buffer_size};
use log::debug;
use serde::{Deserialize, Serialize};

/// Deepest indentation the writer produces, in spaces.
pub const MAX_INDENT: usize = 80;
pub const MIN_WRITE_BUFFER_SIZE: usize = 1 << 8;
pub const MAX_WRITE_BUFFER_SIZE: usize = 1 << 24;

/// Options for [`IterParser`](crate::IterParser).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ParserOptions {
    /// Size of the chunks read from the source, clamped to 1 KiB..=16 MiB.
    /// Defaults to 16 KiB.
    pub buffer_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ParserOptions {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// The buffer size the parser will actually use.
    pub fn effective_buffer_size(&self) -> usize {
        clamp_buffer_size(self.buffer_size)
    }
}

/// Options for [`write_tabledata`](crate::write_tabledata).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WriterOptions {
    /// Write every cell through its converter, even when it is masked. Defaults to false.
    pub write_null_values: bool,
    /// Number of spaces in front of every row, clamped to 0..=80. Defaults to 0.
    pub indent: usize,
    /// Initial capacity of the row buffer, clamped to 256 B..=16 MiB. Defaults to 256.
    pub buffer_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            write_null_values: false,
            indent: 0,
            buffer_size: MIN_WRITE_BUFFER_SIZE,
        }
    }
}

impl WriterOptions {
    pub fn with_write_null_values(mut self, write_null_values: bool) -> Self {
        self.write_null_values = write_null_values;
        self
    }

    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn effective_indent(&self) -> usize {
        if self.indent > MAX_INDENT {
            debug!("Indent {} is too deep, using {}", self.indent, MAX_INDENT);
        }
        self.indent.min(MAX_INDENT)
    }

    pub fn effective_buffer_size(&self) -> usize {
        let clamped = self
            .buffer_size
            .clamp(MIN_WRITE_BUFFER_SIZE, MAX_WRITE_BUFFER_SIZE);
        if clamped != self.buffer_size {
            debug!(
                "Write buffer size {} is out of range, using {} instead",
                self.buffer_size, clamped
            );
        }
        clamped
    }
}

/// Top-level configuration for reading and writing TABLEDATA.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub parser_options: ParserOptions,
    #[serde(default)]
    pub writer_options: WriterOptions,
}

impl Config {
    /// Creates a `Config` struct from a YAML configuration file.
    ///
    /// Missing sections and keys take their default values.
    ///
    /// # Errors
    ///
    /// *   `Error::Io`: If an I/O error occurs while opening or reading the file.
    /// *   `Error::Yaml`: If there is an error parsing the YAML data.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Config = serde_yaml::from_reader(reader).map_err(Error::Yaml)?;
        Ok(config)
    }

    /// Writes the `Config` struct to a YAML file.
    ///
    /// # Errors
    ///
    /// *   `Error::Io`: If an I/O error occurs while creating or writing to the file.
    /// *   `Error::Yaml`: If there is an error serializing the `Config` to YAML.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self).map_err(Error::Yaml)
    }
}

/// Builds a [`Config`] from a YAML string literal, panicking on invalid input.
///
/// ```rust
/// let config = tabxml::config_from_yaml!(
///     r#"
///     writer_options:
///       indent: 8
///     "#
/// );
/// assert_eq!(config.writer_options.indent, 8);
/// assert_eq!(config.parser_options.buffer_size, 16384);
/// ```
#[macro_export]
macro_rules! config_from_yaml {
    ($yaml:expr) => {{
        match serde_yaml::from_str::<$crate::config::Config>($yaml) {
            Ok(config) => config,
            Err(e) => panic!("Invalid YAML configuration: {}", e),
        }
    }};
}
