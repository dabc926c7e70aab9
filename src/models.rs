use serde::{Deserialize, Serialize};

use crate::error::CodeGenError;

/// Referential action attached to a foreign key. The catalog readers map every
/// vendor spelling into this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReferentialRule {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferentialRule::NoAction => "NO ACTION",
            ReferentialRule::Restrict => "RESTRICT",
            ReferentialRule::Cascade => "CASCADE",
            ReferentialRule::SetNull => "SET NULL",
            ReferentialRule::SetDefault => "SET DEFAULT",
        }
    }
}

impl std::fmt::Display for ReferentialRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a column value is produced by the engine, when it is not a plain
/// stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedKind {
    Always,
    Stored,
    Virtual,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Canonical data-type token (`int`, `string`, `DateTime`, ...), or the
    /// raw vendor token when nothing canonical matches.
    pub data_type: String,
    /// The vendor spelling exactly as the catalog reported it.
    pub vendor_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_identity: bool,
    pub is_computed: bool,
    pub computed_expression: Option<String>,
    pub is_row_version: bool,
    pub max_length: Option<i64>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub default_value: Option<String>,
    pub collation: Option<String>,
    pub generated_kind: Option<GeneratedKind>,
    pub comment: Option<String>,
}

impl Column {
    /// A bare column with just a name and type tokens; readers fill in the
    /// rest from catalog rows.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, vendor_type: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            data_type: data_type.into(),
            vendor_type: vendor_type.into(),
            is_nullable: false,
            is_primary_key: false,
            is_identity: false,
            is_computed: false,
            computed_expression: None,
            is_row_version: false,
            max_length: None,
            precision: None,
            scale: None,
            default_value: None,
            collation: None,
            generated_kind: None,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column_name: String,
    /// 1-based position within the index key. Included (leaf-only) columns
    /// carry the ordinal the catalog reports but do not participate in the
    /// contiguity rule.
    pub key_ordinal: u32,
    pub is_descending: bool,
    pub is_included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub is_unique: bool,
    pub is_primary_key: bool,
    pub is_disabled: bool,
    /// Engine-specific tag (`CLUSTERED`, `BTREE`, `btree`, ...).
    pub index_type: String,
    pub columns: Vec<IndexColumn>,
}

impl Index {
    /// A primary-key index must be unique, and key ordinals of non-included
    /// columns must run 1..n without gaps.
    pub fn validate(&self) -> Result<(), CodeGenError> {
        if self.is_primary_key && !self.is_unique {
            return Err(CodeGenError::schema_invariant(format!(
                "index '{}' is marked primary key but not unique",
                self.name
            )));
        }
        let mut expected = 1u32;
        for col in self.columns.iter().filter(|c| !c.is_included) {
            if col.key_ordinal != expected {
                return Err(CodeGenError::schema_invariant(format!(
                    "index '{}' key ordinals are not contiguous: expected {}, found {} on '{}'",
                    self.name, expected, col.key_ordinal, col.column_name
                )));
            }
            expected += 1;
        }
        Ok(())
    }

    /// Names of the key (non-included) columns in ordinal order.
    pub fn key_column_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.is_included)
            .map(|c| c.column_name.as_str())
            .collect()
    }
}

/// One `(fk column, referenced pk column)` pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub foreign_key_column: String,
    pub primary_key_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    /// Referenced (principal) table name.
    pub primary_table: String,
    pub column_pairs: Vec<ColumnPair>,
    pub delete_rule: ReferentialRule,
    pub update_rule: ReferentialRule,
    pub is_enabled: bool,
    pub comment: Option<String>,
}

impl ForeignKey {
    /// Constructs a foreign key, enforcing the composite-key uniqueness
    /// invariant on the single constructor path.
    pub fn new(
        name: impl Into<String>,
        primary_table: impl Into<String>,
        column_pairs: Vec<ColumnPair>,
        delete_rule: ReferentialRule,
        update_rule: ReferentialRule,
        is_enabled: bool,
    ) -> Result<Self, CodeGenError> {
        let name = name.into();
        if column_pairs.len() > 1 {
            let mut fk_cols: Vec<&str> =
                column_pairs.iter().map(|p| p.foreign_key_column.as_str()).collect();
            let mut pk_cols: Vec<&str> =
                column_pairs.iter().map(|p| p.primary_key_column.as_str()).collect();
            fk_cols.sort_unstable();
            pk_cols.sort_unstable();
            if fk_cols.windows(2).any(|w| w[0] == w[1]) || pk_cols.windows(2).any(|w| w[0] == w[1])
            {
                return Err(CodeGenError::schema_invariant(format!(
                    "composite foreign key '{}' repeats a column",
                    name
                )));
            }
        }
        Ok(ForeignKey {
            name,
            primary_table: primary_table.into(),
            column_pairs,
            delete_rule,
            update_rule,
            is_enabled,
            comment: None,
        })
    }

    /// Convenience mirror of `column_pairs[0]`'s FK column.
    pub fn foreign_key_column(&self) -> &str {
        self.column_pairs
            .first()
            .map(|p| p.foreign_key_column.as_str())
            .unwrap_or_default()
    }

    /// Convenience mirror of `column_pairs[0]`'s PK column.
    pub fn primary_key_column(&self) -> &str {
        self.column_pairs
            .first()
            .map(|p| p.primary_key_column.as_str())
            .unwrap_or_default()
    }

    pub fn is_composite_key(&self) -> bool {
        self.column_pairs.len() > 1
    }

    /// Structural validity as the analyzer defines it: at least one pair and
    /// no empty column name on either side.
    pub fn is_structurally_valid(&self) -> bool {
        !self.column_pairs.is_empty()
            && self
                .column_pairs
                .iter()
                .all(|p| !p.foreign_key_column.is_empty() && !p.primary_key_column.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema_name: String,
    pub table_name: String,
    pub comment: Option<String>,
    /// Catalog ordinal order; position is significant.
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Table {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            comment: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    /// True when a non-primary unique index exists whose key column set is
    /// exactly `columns` (order-insensitive).
    pub fn has_unique_index_on(&self, columns: &[&str]) -> bool {
        let mut wanted: Vec<&str> = columns.to_vec();
        wanted.sort_unstable();
        self.indexes.iter().any(|idx| {
            if !idx.is_unique || idx.is_primary_key {
                return false;
            }
            let mut keys = idx.key_column_names();
            keys.sort_unstable();
            keys == wanted
        })
    }

    /// Cross-entity checks: at most one primary-key index, PK columns
    /// non-empty exactly when a primary-key index exists, per-index ordinal
    /// contiguity, decimal columns carry a precision, and varying-length
    /// text columns carry a length.
    pub fn validate(&self) -> Result<(), CodeGenError> {
        let pk_indexes = self.indexes.iter().filter(|i| i.is_primary_key).count();
        if pk_indexes > 1 {
            return Err(CodeGenError::schema(
                &self.table_name,
                format!("{} primary-key indexes", pk_indexes),
            ));
        }
        let pk_columns = self.columns.iter().filter(|c| c.is_primary_key).count();
        if pk_indexes == 1 && pk_columns == 0 {
            return Err(CodeGenError::schema(
                &self.table_name,
                "primary-key index present but no column carries the primary-key flag",
            ));
        }
        if pk_indexes == 0 && pk_columns > 0 {
            return Err(CodeGenError::schema(
                &self.table_name,
                "primary-key columns present but no primary-key index",
            ));
        }
        for idx in &self.indexes {
            idx.validate()
                .map_err(|e| CodeGenError::schema(&self.table_name, e.to_string()))?;
        }
        for col in &self.columns {
            if col.data_type == "decimal" && col.precision.is_none() {
                return Err(CodeGenError::schema(
                    &self.table_name,
                    format!("decimal column '{}' has no precision", col.name),
                ));
            }
            if col.data_type == "string" && col.vendor_type.contains("var") && col.max_length.is_none()
            {
                return Err(CodeGenError::schema(
                    &self.table_name,
                    format!("varying-length column '{}' has no max length", col.name),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RelationshipKind {
    #[default]
    Unknown,
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// One FK column pair as carried on a `Relationship`, rules included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub foreign_key_column: String,
    pub primary_key_column: String,
    pub delete_rule: ReferentialRule,
    pub update_rule: ReferentialRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionTableInfo {
    pub table_name: String,
    /// Every FK column of the junction, in declaration order.
    pub source_key_columns: Vec<String>,
    /// Payload columns that are not part of any foreign key.
    pub additional_columns: Vec<String>,
}

/// Analyzer output; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub source_table: String,
    pub target_table: String,
    pub foreign_key_infos: Vec<ForeignKeyInfo>,
    pub junction: Option<JunctionTableInfo>,
}

impl Relationship {
    pub fn unknown(source: &Table, target: &Table) -> Self {
        Relationship {
            kind: RelationshipKind::Unknown,
            source_table: source.table_name.clone(),
            target_table: target.table_name.clone(),
            foreign_key_infos: Vec::new(),
            junction: None,
        }
    }
}
