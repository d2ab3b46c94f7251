//! Core value types shared by the context builder, the recovery engine and
//! the applicator.
//!
//! Everything here is plain data: no oracle access, no IO.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entry point of a function in the program's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionAddress(pub u64);

impl FunctionAddress {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Name a disassembler would give an unnamed function at this address.
    pub fn default_name(self) -> String {
        format!("sub_{:X}", self.0)
    }
}

impl fmt::Display for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl From<u64> for FunctionAddress {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid address '{0}': expected hex (0x401000) or decimal")]
pub struct ParseAddressError(pub String);

impl FromStr for FunctionAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some(hex) =
            trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else {
            trimmed.parse::<u64>()
        };
        parsed.map(FunctionAddress).map_err(|_| ParseAddressError(s.to_string()))
    }
}

/// A resolved call relationship between two functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: FunctionAddress,
    pub callee: FunctionAddress,
    /// Number of distinct discovery hits for this pair.
    pub call_sites: u32,
}

/// One proposed local-variable rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRename {
    pub original_name: String,
    pub new_name: String,
}

impl VariableRename {
    pub fn new(original_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self { original_name: original_name.into(), new_name: new_name.into() }
    }
}

/// The edits a model proposes for one function.
///
/// Always fully populated: absent fields are empty rather than missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEditSet {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub variables: Vec<VariableRename>,
    #[serde(default)]
    pub security_role: String,
}

impl ModelEditSet {
    /// Edit-set carrying only an explanatory comment.
    pub fn with_comment(comment: impl Into<String>) -> Self {
        Self { comment: comment.into(), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.comment.is_empty()
            && self.function_name.is_empty()
            && self.variables.is_empty()
            && self.security_role.is_empty()
    }

    /// Serialize to the JSON shape models are asked to produce.
    pub fn to_json(&self) -> String {
        let variables: Vec<serde_json::Value> = self
            .variables
            .iter()
            .map(|v| {
                serde_json::json!({ "original_name": v.original_name, "new_name": v.new_name })
            })
            .collect();
        serde_json::json!({
            "comment": self.comment,
            "function_name": self.function_name,
            "variables": variables,
            "security_role": self.security_role,
        })
        .to_string()
    }
}

/// Descriptive metadata about the loaded program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInfo {
    pub filename: String,
    pub processor: String,
    pub is_64bit: bool,
    pub is_ios: bool,
}

impl BinaryInfo {
    /// Build binary info, guessing whether the program targets iOS from its
    /// file extension and segment names.
    pub fn detect<'a>(
        filename: impl Into<String>,
        processor: impl Into<String>,
        is_64bit: bool,
        segment_names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let filename = filename.into();
        let extension = Path::new(&filename)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let is_ios = extension == "dylib"
            || extension == "framework"
            || segment_names.into_iter().any(|name| name.contains("__OBJC"));
        Self { filename, processor: processor.into(), is_64bit, is_ios }
    }

    pub fn bitness(&self) -> &'static str {
        if self.is_64bit {
            "64-bit"
        } else {
            "32-bit"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal_addresses() {
        assert_eq!("0x401000".parse::<FunctionAddress>(), Ok(FunctionAddress(0x401000)));
        assert_eq!("4096".parse::<FunctionAddress>(), Ok(FunctionAddress(4096)));
        assert!("zz".parse::<FunctionAddress>().is_err());
    }

    #[test]
    fn default_name_uses_uppercase_hex() {
        assert_eq!(FunctionAddress(0x1000ab).default_name(), "sub_1000AB");
    }

    #[test]
    fn detects_ios_from_objc_segment() {
        let info = BinaryInfo::detect("Payload", "ARM", true, ["__TEXT", "__OBJC_RO"]);
        assert!(info.is_ios);
        let info = BinaryInfo::detect("libfoo.dylib", "ARM", true, []);
        assert!(info.is_ios);
        let info = BinaryInfo::detect("server.elf", "metapc", false, [".text"]);
        assert!(!info.is_ios);
        assert_eq!(info.bitness(), "32-bit");
    }

    #[test]
    fn edit_set_json_has_all_fields() {
        let mut edits = ModelEditSet::with_comment("does things");
        edits.variables.push(VariableRename::new("a1", "count"));
        let value: serde_json::Value =
            serde_json::from_str(&edits.to_json()).expect("valid json");
        assert_eq!(value["comment"], "does things");
        assert_eq!(value["function_name"], "");
        assert_eq!(value["variables"][0]["new_name"], "count");
    }
}
