//! Change sets: the wire shape between the analyzer and the engine
//!
//! The outer shape stays untyped (serde values) so it can cross process
//! boundaries unchanged; entity payloads are embedded as serialized
//! FileNode/Symbol records and recovered typed on application.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use arbor_core::{FileNode, MetaMap, Symbol, SymbolId};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    FileAdd,
    FileModify,
    FileDelete,
    SymbolAdd,
    SymbolModify,
    SymbolDelete,
}

impl ChangeType {
    /// Batch priority; lower is more urgent.
    pub fn priority(&self) -> u8 {
        match self {
            ChangeType::FileDelete => 1,
            ChangeType::SymbolDelete => 2,
            ChangeType::FileAdd => 3,
            ChangeType::SymbolAdd => 4,
            ChangeType::FileModify => 5,
            ChangeType::SymbolModify => 6,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ChangeType::FileAdd => "file_add",
            ChangeType::FileModify => "file_modify",
            ChangeType::FileDelete => "file_delete",
            ChangeType::SymbolAdd => "symbol_add",
            ChangeType::SymbolModify => "symbol_modify",
            ChangeType::SymbolDelete => "symbol_delete",
        }
    }

    pub fn parse(tag: &str) -> Result<Self, EngineError> {
        match tag {
            "file_add" => Ok(ChangeType::FileAdd),
            "file_modify" => Ok(ChangeType::FileModify),
            "file_delete" => Ok(ChangeType::FileDelete),
            "symbol_add" => Ok(ChangeType::SymbolAdd),
            "symbol_modify" => Ok(ChangeType::SymbolModify),
            "symbol_delete" => Ok(ChangeType::SymbolDelete),
            other => Err(EngineError::UnknownChangeType(other.to_string())),
        }
    }
}

/// One nested change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// What the record describes: "file", "symbol", or "rename".
    #[serde(rename = "type")]
    pub change_kind: String,
    /// Entity id the record targets.
    pub target: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
}

/// A batch of change records scoped to one file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub file_path: String,
    pub changes: Vec<FieldChange>,
    pub timestamp: SystemTime,
    pub metadata: MetaMap,
}

impl ChangeSet {
    pub fn new(change_type: ChangeType, file_path: &str, changes: Vec<FieldChange>) -> Self {
        let id = Self::derive_id(change_type, file_path, &changes);
        ChangeSet {
            id,
            change_type,
            file_path: file_path.to_string(),
            changes,
            timestamp: SystemTime::now(),
            metadata: MetaMap::new(),
        }
    }

    /// Identical content derives an identical id, which keeps duplicate
    /// queueing idempotent.
    fn derive_id(change_type: ChangeType, file_path: &str, changes: &[FieldChange]) -> String {
        let mut hasher = DefaultHasher::new();
        change_type.tag().hash(&mut hasher);
        file_path.hash(&mut hasher);
        for change in changes {
            change.change_kind.hash(&mut hasher);
            change.target.hash(&mut hasher);
            if let Some(v) = &change.old_value {
                v.to_string().hash(&mut hasher);
            }
            if let Some(v) = &change.new_value {
                v.to_string().hash(&mut hasher);
            }
        }
        format!("cs-{:016x}", hasher.finish())
    }

    // ── Constructors used by the incremental analyzer ───

    pub fn file_add(file: &FileNode, symbols: &[Symbol]) -> Result<Self, EngineError> {
        let mut changes = vec![FieldChange {
            change_kind: "file".to_string(),
            target: file.path.clone(),
            old_value: None,
            new_value: Some(to_value(file)?),
        }];
        for symbol in symbols {
            changes.push(FieldChange {
                change_kind: "symbol".to_string(),
                target: symbol.id.0.clone(),
                old_value: None,
                new_value: Some(to_value(symbol)?),
            });
        }
        Ok(Self::new(ChangeType::FileAdd, &file.path, changes))
    }

    pub fn file_modify(
        old_file: Option<&FileNode>,
        file: &FileNode,
        symbols: &[Symbol],
    ) -> Result<Self, EngineError> {
        let mut changes = vec![FieldChange {
            change_kind: "file".to_string(),
            target: file.path.clone(),
            old_value: old_file.map(to_value).transpose()?,
            new_value: Some(to_value(file)?),
        }];
        for symbol in symbols {
            changes.push(FieldChange {
                change_kind: "symbol".to_string(),
                target: symbol.id.0.clone(),
                old_value: None,
                new_value: Some(to_value(symbol)?),
            });
        }
        Ok(Self::new(ChangeType::FileModify, &file.path, changes))
    }

    pub fn file_delete(path: &str, old_file: Option<&FileNode>) -> Result<Self, EngineError> {
        let changes = vec![FieldChange {
            change_kind: "file".to_string(),
            target: path.to_string(),
            old_value: old_file.map(to_value).transpose()?,
            new_value: None,
        }];
        Ok(Self::new(ChangeType::FileDelete, path, changes))
    }

    pub fn symbol_add(file_path: &str, symbol: &Symbol) -> Result<Self, EngineError> {
        let changes = vec![FieldChange {
            change_kind: "symbol".to_string(),
            target: symbol.id.0.clone(),
            old_value: None,
            new_value: Some(to_value(symbol)?),
        }];
        Ok(Self::new(ChangeType::SymbolAdd, file_path, changes))
    }

    pub fn symbol_modify(
        file_path: &str,
        old: Option<&Symbol>,
        new: &Symbol,
    ) -> Result<Self, EngineError> {
        let changes = vec![FieldChange {
            change_kind: "symbol".to_string(),
            target: new.id.0.clone(),
            old_value: old.map(to_value).transpose()?,
            new_value: Some(to_value(new)?),
        }];
        Ok(Self::new(ChangeType::SymbolModify, file_path, changes))
    }

    /// A rename fused from a delete/add pair: old and new carry different
    /// symbol ids.
    pub fn symbol_rename(
        file_path: &str,
        old: &Symbol,
        new: &Symbol,
        confidence: f64,
    ) -> Result<Self, EngineError> {
        let changes = vec![FieldChange {
            change_kind: "rename".to_string(),
            target: new.id.0.clone(),
            old_value: Some(to_value(old)?),
            new_value: Some(to_value(new)?),
        }];
        let mut set = Self::new(ChangeType::SymbolModify, file_path, changes);
        set.metadata.insert(
            "rename_confidence".to_string(),
            arbor_core::MetaValue::Float(confidence),
        );
        Ok(set)
    }

    pub fn symbol_delete(file_path: &str, id: &SymbolId, old: Option<&Symbol>) -> Result<Self, EngineError> {
        let changes = vec![FieldChange {
            change_kind: "symbol".to_string(),
            target: id.0.clone(),
            old_value: old.map(to_value).transpose()?,
            new_value: None,
        }];
        Ok(Self::new(ChangeType::SymbolDelete, file_path, changes))
    }

    // ── Typed payload recovery ──────────────────────────

    /// The FileNode payload of a file-level change set.
    pub fn file_payload(&self) -> Result<Option<FileNode>, EngineError> {
        for change in &self.changes {
            if change.change_kind == "file" {
                if let Some(value) = &change.new_value {
                    return Ok(Some(from_value(value.clone())?));
                }
            }
        }
        Ok(None)
    }

    /// All symbol payloads: (old, new) per record.
    pub fn symbol_payloads(&self) -> Result<Vec<(Option<Symbol>, Option<Symbol>)>, EngineError> {
        let mut out = Vec::new();
        for change in &self.changes {
            if change.change_kind == "symbol" || change.change_kind == "rename" {
                let old = change
                    .old_value
                    .clone()
                    .map(from_value::<Symbol>)
                    .transpose()?;
                let new = change
                    .new_value
                    .clone()
                    .map(from_value::<Symbol>)
                    .transpose()?;
                out.push((old, new));
            }
        }
        Ok(out)
    }

    pub fn priority(&self) -> u8 {
        self.change_type.priority()
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::InvalidChange(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, EngineError> {
    serde_json::from_value(value).map_err(|e| EngineError::InvalidChange(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Language, SourceLocation, SymbolKind, Visibility};

    fn symbol(name: &str) -> Symbol {
        Symbol {
            id: SymbolId::new("src/a.ts", name, 1),
            name: name.to_string(),
            kind: SymbolKind::Function,
            language: Language::TypeScript,
            location: SourceLocation::default(),
            signature: format!("{}(): void", name),
            documentation: None,
            visibility: Visibility::Public,
            qualified_name: name.to_string(),
        }
    }

    fn file() -> FileNode {
        FileNode {
            path: "src/a.ts".to_string(),
            language: Language::TypeScript,
            size_bytes: 10,
            line_count: 1,
            symbol_count: 1,
            import_count: 0,
            is_test: false,
            is_generated: false,
            modified_at: SystemTime::UNIX_EPOCH,
            symbols: vec![SymbolId::new("src/a.ts", "f", 1)],
            imports: Vec::new(),
        }
    }

    #[test]
    fn priorities_follow_the_ladder() {
        assert_eq!(ChangeType::FileDelete.priority(), 1);
        assert_eq!(ChangeType::SymbolDelete.priority(), 2);
        assert_eq!(ChangeType::FileAdd.priority(), 3);
        assert_eq!(ChangeType::SymbolAdd.priority(), 4);
        assert_eq!(ChangeType::FileModify.priority(), 5);
        assert_eq!(ChangeType::SymbolModify.priority(), 6);
    }

    #[test]
    fn identical_content_identical_id() {
        let f = file();
        let s = symbol("f");
        let a = ChangeSet::file_add(&f, std::slice::from_ref(&s)).unwrap();
        let b = ChangeSet::file_add(&f, std::slice::from_ref(&s)).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn payload_roundtrip() {
        let f = file();
        let s = symbol("f");
        let set = ChangeSet::file_add(&f, std::slice::from_ref(&s)).unwrap();
        assert_eq!(set.file_payload().unwrap(), Some(f));
        let payloads = set.symbol_payloads().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].1.as_ref(), Some(&s));
    }

    #[test]
    fn unknown_change_type_is_rejected() {
        assert!(matches!(
            ChangeType::parse("file_rename"),
            Err(EngineError::UnknownChangeType(_))
        ));
        assert_eq!(ChangeType::parse("file_add").unwrap(), ChangeType::FileAdd);
    }

    #[test]
    fn wire_shape_uses_snake_case_tags() {
        let set = ChangeSet::file_delete("src/a.ts", None).unwrap();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["type"], "file_delete");
        assert_eq!(json["file_path"], "src/a.ts");
        assert!(json["changes"].is_array());
    }
}
