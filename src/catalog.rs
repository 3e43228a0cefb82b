//! Register catalogs: the loader interface and its JSON file implementation.
//!
//! After a CPU is discovered, the client asks the loader for that CPU's
//! register list, keyed by the CPU's reported name and application version.
//! On disk a catalog is one JSON document per `<name>/<version>` with a
//! top-level `"Registers"` array.

use std::path::PathBuf;

use serde_derive::Deserialize;
use thiserror::Error;

use crate::register::{Direction, Source};
use crate::value::VariableType;

/// One register as described by a catalog, before it is bound to a CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDef {
    pub id: u32,
    pub name: String,
    pub direction: Direction,
    pub var_type: VariableType,
    pub source: Source,
    pub deref_depth: u8,
    pub offset: u32,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not open register catalog {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("register catalog {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Produces the register list for a discovered CPU.
///
/// Implementations are free to read files, query a database or serve from
/// memory; the client only cares about the resulting definitions. A load
/// failure is surfaced as an error event and leaves the CPU usable for raw
/// queries.
pub trait CatalogLoader {
    fn load(
        &self,
        cpu_name: &str,
        application_version: &str,
    ) -> Result<Vec<RegisterDef>, CatalogError>;
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(rename = "Registers")]
    registers: Vec<RawRegisterDef>,
}

#[derive(Deserialize)]
struct RawRegisterDef {
    id: u32,
    name: String,
    #[serde(rename = "ReadWrite")]
    read_write: String,
    #[serde(rename = "Type")]
    var_type: String,
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "DerefDepth")]
    deref_depth: u8,
    #[serde(rename = "Offset")]
    offset: u32,
}

impl RawRegisterDef {
    fn into_def(self) -> RegisterDef {
        RegisterDef {
            id: self.id,
            direction: direction_from_str(&self.read_write),
            var_type: variable_type_from_str(&self.var_type),
            source: source_from_str(&self.source),
            deref_depth: self.deref_depth,
            offset: self.offset,
            name: self.name,
        }
    }
}

fn direction_from_str(s: &str) -> Direction {
    match s {
        "Read" => Direction::Read,
        "Write" => Direction::Write,
        other => {
            log::warn!("unknown ReadWrite value in catalog: {other:?}");
            Direction::Unknown
        }
    }
}

fn variable_type_from_str(s: &str) -> VariableType {
    match s {
        "pointer" => VariableType::Pointer,
        "bool" => VariableType::Bool,
        "int8_t" | "uint8_t" => VariableType::Char,
        "int16_t" | "uint16_t" => VariableType::Short,
        "int32_t" | "uint32_t" => VariableType::Int,
        "int64_t" | "uint64_t" => VariableType::Long,
        "float" => VariableType::Float,
        "double" => VariableType::Double,
        "long double" => VariableType::LongDouble,
        other => {
            log::warn!("unknown Type value in catalog: {other:?}");
            VariableType::Unknown
        }
    }
}

fn source_from_str(s: &str) -> Source {
    match s {
        "HandWrittenOffset" => Source::HandWrittenOffset,
        "HandWrittenIndex" => Source::HandWrittenIndex,
        "SimulinkCApiOffset" => Source::SimulinkCApiOffset,
        "SimulinkCApiIndex" => Source::SimulinkCApiIndex,
        "AbsoluteAddress" => Source::AbsoluteAddress,
        other => {
            log::warn!("unknown Source value in catalog: {other:?}");
            Source::Unknown
        }
    }
}

/// Loads catalogs from `<base_dir>/<cpu_name>/<application_version>.json`.
pub struct JsonCatalogLoader {
    base_dir: PathBuf,
}

impl JsonCatalogLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        JsonCatalogLoader {
            base_dir: base_dir.into(),
        }
    }
}

impl CatalogLoader for JsonCatalogLoader {
    fn load(
        &self,
        cpu_name: &str,
        application_version: &str,
    ) -> Result<Vec<RegisterDef>, CatalogError> {
        let path = self
            .base_dir
            .join(cpu_name)
            .join(format!("{application_version}.json"));
        let display = path.display().to_string();
        let data = std::fs::read(&path).map_err(|source| CatalogError::Open {
            path: display.clone(),
            source,
        })?;
        let file: CatalogFile =
            serde_json::from_slice(&data).map_err(|source| CatalogError::Parse {
                path: display,
                source,
            })?;
        Ok(file
            .registers
            .into_iter()
            .map(RawRegisterDef::into_def)
            .collect())
    }
}
