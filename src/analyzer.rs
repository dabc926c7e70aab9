use std::collections::HashSet;

use crate::error::CodeGenError;
use crate::models::{
    ForeignKey, ForeignKeyInfo, JunctionTableInfo, Relationship, RelationshipKind, Table,
};

/// A junction table may carry at most this many payload (non-PK) columns.
const JUNCTION_PAYLOAD_LIMIT: usize = 3;

/// Classifies the ordered pair `(source, target)` into a `Relationship`.
/// Stateless and safe to call concurrently; a given input pair always
/// produces the same output. Internal faults are downgraded to `Unknown`
/// with a logged warning; unnamed tables are an error.
pub fn analyze_relationship(
    source: &Table,
    target: &Table,
) -> Result<Relationship, CodeGenError> {
    if source.table_name.is_empty() || target.table_name.is_empty() {
        return Err(CodeGenError::analysis(
            source.table_name.clone(),
            target.table_name.clone(),
            "both tables must be named",
        ));
    }
    if source.columns.is_empty() {
        log::info!("Table '{}' has no columns", source.table_name);
    }
    if target.columns.is_empty() {
        log::info!("Table '{}' has no columns", target.table_name);
    }

    match classify(source, target) {
        Ok(relationship) => Ok(relationship),
        Err(e) => {
            log::warn!(
                "Relationship analysis for '{}' -> '{}' downgraded to Unknown: {}",
                source.table_name,
                target.table_name,
                e
            );
            Ok(Relationship::unknown(source, target))
        }
    }
}

/// Classifies every ordered pair of distinct tables, dropping `Unknown`
/// results. Analysis failures are logged and never fail the sweep.
pub fn analyze_all(tables: &[Table]) -> Vec<Relationship> {
    let mut relationships = Vec::new();
    for (i, source) in tables.iter().enumerate() {
        for (j, target) in tables.iter().enumerate() {
            if i == j {
                continue;
            }
            match analyze_relationship(source, target) {
                Ok(rel) if rel.kind != RelationshipKind::Unknown => relationships.push(rel),
                Ok(_) => {}
                Err(e) => log::warn!("{}", e),
            }
        }
    }
    relationships
}

fn candidate_keys<'a>(source: &'a Table, target: &Table) -> Vec<&'a ForeignKey> {
    source
        .foreign_keys
        .iter()
        .filter(|fk| {
            fk.is_enabled && fk.primary_table == target.table_name && fk.is_structurally_valid()
        })
        .collect()
}

fn foreign_key_infos(fk: &ForeignKey) -> Vec<ForeignKeyInfo> {
    fk.column_pairs
        .iter()
        .map(|pair| ForeignKeyInfo {
            foreign_key_column: pair.foreign_key_column.clone(),
            primary_key_column: pair.primary_key_column.clone(),
            delete_rule: fk.delete_rule,
            update_rule: fk.update_rule,
        })
        .collect()
}

fn classify(source: &Table, target: &Table) -> Result<Relationship, CodeGenError> {
    let candidates = candidate_keys(source, target);
    let Some(fk) = candidates.first() else {
        return Ok(Relationship::unknown(source, target));
    };

    if is_junction_table(source) {
        return Ok(many_to_many(source, target, fk));
    }

    let fk_columns: Vec<&str> = fk
        .column_pairs
        .iter()
        .map(|p| p.foreign_key_column.as_str())
        .collect();
    if source.has_unique_index_on(&fk_columns) {
        // dependent first, principal second
        return Ok(Relationship {
            kind: RelationshipKind::OneToOne,
            source_table: source.table_name.clone(),
            target_table: target.table_name.clone(),
            foreign_key_infos: foreign_key_infos(fk),
            junction: None,
        });
    }

    // One-to-many is reported from the principal's point of view
    Ok(Relationship {
        kind: RelationshipKind::OneToMany,
        source_table: target.table_name.clone(),
        target_table: source.table_name.clone(),
        foreign_key_infos: foreign_key_infos(fk),
        junction: None,
    })
}

/// A junction table references at least two distinct tables, has a composite
/// primary key whose every column is also an FK column, and carries at most
/// `JUNCTION_PAYLOAD_LIMIT` payload columns.
fn is_junction_table(table: &Table) -> bool {
    let referenced: HashSet<&str> = table
        .foreign_keys
        .iter()
        .filter(|fk| fk.is_enabled && fk.is_structurally_valid())
        .map(|fk| fk.primary_table.as_str())
        .collect();
    if referenced.len() < 2 {
        return false;
    }

    let pk_columns: Vec<&str> = table
        .primary_key_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    if pk_columns.len() < 2 {
        return false;
    }

    let fk_columns: HashSet<&str> = table
        .foreign_keys
        .iter()
        .flat_map(|fk| fk.column_pairs.iter())
        .map(|pair| pair.foreign_key_column.as_str())
        .collect();
    if !pk_columns.iter().all(|c| fk_columns.contains(c)) {
        return false;
    }

    let payload_columns = table.columns.iter().filter(|c| !c.is_primary_key).count();
    payload_columns <= JUNCTION_PAYLOAD_LIMIT
}

fn many_to_many(source: &Table, target: &Table, fk: &ForeignKey) -> Relationship {
    // FK columns of the junction in declaration order, without repeats
    let mut source_key_columns: Vec<String> = Vec::new();
    for pair in source
        .foreign_keys
        .iter()
        .flat_map(|fk| fk.column_pairs.iter())
    {
        if !source_key_columns.contains(&pair.foreign_key_column) {
            source_key_columns.push(pair.foreign_key_column.clone());
        }
    }
    let additional_columns: Vec<String> = source
        .columns
        .iter()
        .filter(|c| !source_key_columns.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();

    // the endpoint on the far side of the junction
    let other_endpoint = source
        .foreign_keys
        .iter()
        .filter(|fk| fk.is_enabled && fk.is_structurally_valid())
        .map(|fk| fk.primary_table.clone())
        .find(|referenced| referenced != &target.table_name)
        .unwrap_or_else(|| target.table_name.clone());

    Relationship {
        kind: RelationshipKind::ManyToMany,
        source_table: target.table_name.clone(),
        target_table: other_endpoint,
        foreign_key_infos: foreign_key_infos(fk),
        junction: Some(JunctionTableInfo {
            table_name: source.table_name.clone(),
            source_key_columns,
            additional_columns,
        }),
    }
}
