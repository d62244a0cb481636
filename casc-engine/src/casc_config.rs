use crate::error::{CascError, Result};
use crate::keys::{ContentKey, EncodingKey};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::trace;

/// A `key = value1 value2 ...` manifest (build config, CDN config).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascConfig {
    variables: HashMap<String, Variable>,
    /// Where the config came from, for error messages.
    origin: String,
}

/// Represents a variable in the CASC configuration, with a name and a list of values.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Variable {
    /// The name of the variable.
    pub name: String,
    /// The whitespace-separated values associated with the variable.
    pub values: Vec<String>,
}

impl Variable {
    /// Creates a new `Variable` with the given name and values.
    pub fn new(name: String, values: Vec<String>) -> Self {
        Variable { name, values }
    }
}

impl CascConfig {
    /// Creates a new, empty `CascConfig`.
    pub fn new(origin: &str) -> Self {
        CascConfig {
            variables: HashMap::new(),
            origin: origin.to_string(),
        }
    }

    /// Parses a config from a reader.
    ///
    /// Blank lines and lines starting with `#` are skipped. Every other line
    /// must contain exactly one `=`.
    pub fn parse<R: Read>(reader: R, origin: &str) -> Result<Self> {
        let mut config = CascConfig::new(origin);
        let reader = BufReader::new(reader);

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            // Ignore empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let separators = line.matches('=').count();
            if separators != 1 {
                return Err(CascError::Parse {
                    origin: origin.to_string(),
                    line: number + 1,
                    reason: format!("expected exactly one '=', found {separators}"),
                });
            }

            if let Some((name, value)) = line.split_once('=') {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(CascError::Parse {
                        origin: origin.to_string(),
                        line: number + 1,
                        reason: "empty key".to_string(),
                    });
                }
                let values: Vec<String> = value.split_whitespace().map(|v| v.to_string()).collect();
                trace!("{origin}: {name} = {values:?}");
                config
                    .variables
                    .insert(name.clone(), Variable::new(name, values));
            }
        }

        Ok(config)
    }

    pub fn parse_str(text: &str, origin: &str) -> Result<Self> {
        Self::parse(text.as_bytes(), origin)
    }

    /// Loads configuration variables from a file.
    pub fn from_file<P: AsRef<Path>>(file_name: P) -> Result<Self> {
        let path = file_name.as_ref();
        let file = File::open(path)
            .map_err(|_| CascError::FileNotFound(path.display().to_string()))?;
        Self::parse(file, &path.display().to_string())
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Retrieves a variable by name, if it exists.
    pub fn get(&self, var_name: &str) -> Option<&Variable> {
        self.variables.get(var_name)
    }

    /// The values of a variable, empty if it does not exist.
    pub fn values(&self, var_name: &str) -> &[String] {
        self.get(var_name).map(|v| v.values.as_slice()).unwrap_or(&[])
    }

    /// The `index`-th value of a variable.
    pub fn value(&self, var_name: &str, index: usize) -> Option<&str> {
        self.values(var_name).get(index).map(String::as_str)
    }

    /// The `index`-th value of a variable, or a [`CascError::MissingConfigKey`].
    pub fn require(&self, var_name: &str, index: usize) -> Result<&str> {
        self.value(var_name, index)
            .ok_or_else(|| CascError::MissingConfigKey {
                key: if index == 0 {
                    var_name.to_string()
                } else {
                    format!("{var_name}[{index}]")
                },
                config: self.origin.clone(),
            })
    }

    pub fn content_key(&self, var_name: &str, index: usize) -> Result<ContentKey> {
        ContentKey::from_hex(self.require(var_name, index)?)
    }

    pub fn encoding_key(&self, var_name: &str, index: usize) -> Result<EncodingKey> {
        EncodingKey::from_hex(self.require(var_name, index)?)
    }

    /// Names of all variables, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}
