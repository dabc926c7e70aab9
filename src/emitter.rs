use std::fs;
use std::path::{Path, PathBuf};

use heck::ToUpperCamelCase;

use crate::config::CodeGeneratorConfig;
use crate::error::CodeGenError;
use crate::models::{Column, ReferentialRule, Relationship, RelationshipKind, Table};

/// Naive English pluralizer for collection and set names.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{name}es")
    } else if lower.ends_with('y')
        && !matches!(
            lower.as_bytes().get(lower.len().wrapping_sub(2)),
            Some(b'a' | b'e' | b'i' | b'o' | b'u')
        )
    {
        format!("{}ies", &name[..name.len() - 1])
    } else {
        format!("{name}s")
    }
}

fn entity_name(table: &Table) -> String {
    table.table_name.to_upper_camel_case()
}

fn property_name(column: &Column) -> String {
    column.name.to_upper_camel_case()
}

fn clr_type(column: &Column) -> String {
    let base = column.data_type.as_str();
    let is_value_type = matches!(
        base,
        "bool" | "byte" | "short" | "int" | "long" | "float" | "double" | "decimal"
            | "DateTime" | "DateTimeOffset" | "TimeSpan" | "Guid"
    );
    if column.is_nullable && (is_value_type || base == "string" || base == "byte[]") {
        format!("{base}?")
    } else {
        base.to_string()
    }
}

fn delete_behavior(rule: ReferentialRule) -> &'static str {
    match rule {
        ReferentialRule::Cascade => "DeleteBehavior.Cascade",
        ReferentialRule::Restrict => "DeleteBehavior.Restrict",
        ReferentialRule::SetNull | ReferentialRule::SetDefault => "DeleteBehavior.SetNull",
        ReferentialRule::NoAction => "DeleteBehavior.NoAction",
    }
}

/// Writes entity classes, per-entity mapping configurations and the context
/// class under the configured output directory.
pub struct CodeEmitter<'a> {
    config: &'a CodeGeneratorConfig,
}

impl<'a> CodeEmitter<'a> {
    pub fn new(config: &'a CodeGeneratorConfig) -> Self {
        CodeEmitter { config }
    }

    pub fn emit(
        &self,
        tables: &[Table],
        relationships: &[Relationship],
    ) -> Result<Vec<PathBuf>, CodeGenError> {
        let output = Path::new(&self.config.output);
        let entities_dir = output.join("Entities");
        let configurations_dir = output.join("Configurations");
        fs::create_dir_all(&entities_dir).map_err(CodeGenError::emit)?;
        fs::create_dir_all(&configurations_dir).map_err(CodeGenError::emit)?;

        let mut written = Vec::new();
        for table in tables {
            let name = entity_name(table);
            let entity_path = entities_dir.join(format!("{name}.cs"));
            fs::write(&entity_path, self.entity_source(table, relationships))
                .map_err(CodeGenError::emit)?;
            written.push(entity_path);

            let config_path = configurations_dir.join(format!("{name}Configuration.cs"));
            fs::write(&config_path, self.configuration_source(table))
                .map_err(CodeGenError::emit)?;
            written.push(config_path);
        }

        let context_path = output.join(format!("{}.cs", self.config.context_name));
        fs::write(&context_path, self.context_source(tables)).map_err(CodeGenError::emit)?;
        written.push(context_path);

        log::info!("Wrote {} files to {}", written.len(), output.display());
        Ok(written)
    }

    fn collection_name(&self, name: &str) -> String {
        if self.config.pluralize {
            pluralize(name)
        } else {
            name.to_string()
        }
    }

    fn entity_source(&self, table: &Table, relationships: &[Relationship]) -> String {
        let name = entity_name(table);
        let annotations = self.config.data_annotations;
        let mut out = String::new();
        out.push_str("using System;\n");
        out.push_str("using System.Collections.Generic;\n");
        if annotations {
            out.push_str("using System.ComponentModel.DataAnnotations;\n");
            out.push_str("using System.ComponentModel.DataAnnotations.Schema;\n");
        }
        out.push_str(&format!("\nnamespace {};\n\n", self.config.namespace));
        if let Some(comment) = &table.comment {
            out.push_str(&format!("/// <summary>\n/// {}\n/// </summary>\n", comment));
        }
        if annotations {
            out.push_str(&format!(
                "[Table(\"{}\", Schema = \"{}\")]\n",
                table.table_name, table.schema_name
            ));
        }
        out.push_str(&format!("public class {name}\n{{\n"));

        for column in &table.columns {
            if let Some(comment) = &column.comment {
                out.push_str(&format!("    /// <summary>{}</summary>\n", comment));
            }
            if annotations {
                if column.is_primary_key {
                    out.push_str("    [Key]\n");
                }
                if !column.is_nullable && column.data_type == "string" {
                    out.push_str("    [Required]\n");
                }
                if column.data_type == "string" {
                    if let Some(len) = column.max_length.filter(|l| *l > 0) {
                        out.push_str(&format!("    [MaxLength({len})]\n"));
                    }
                }
                if column.is_identity {
                    out.push_str(
                        "    [DatabaseGenerated(DatabaseGeneratedOption.Identity)]\n",
                    );
                }
                if column.is_computed || column.is_row_version {
                    out.push_str(
                        "    [DatabaseGenerated(DatabaseGeneratedOption.Computed)]\n",
                    );
                }
                if column.name != property_name(column) {
                    out.push_str(&format!("    [Column(\"{}\")]\n", column.name));
                }
            }
            out.push_str(&format!(
                "    public {} {} {{ get; set; }}\n\n",
                clr_type(column),
                property_name(column)
            ));
        }

        // navigation properties from the relationship graph
        for rel in relationships {
            match rel.kind {
                RelationshipKind::OneToMany if rel.source_table == table.table_name => {
                    let dependent = rel.target_table.to_upper_camel_case();
                    out.push_str(&format!(
                        "    public virtual ICollection<{dependent}> {} {{ get; set; }} = new List<{dependent}>();\n\n",
                        self.collection_name(&dependent)
                    ));
                }
                RelationshipKind::OneToMany if rel.target_table == table.table_name => {
                    let principal = rel.source_table.to_upper_camel_case();
                    out.push_str(&format!(
                        "    public virtual {principal}? {principal} {{ get; set; }}\n\n"
                    ));
                }
                RelationshipKind::OneToOne if rel.source_table == table.table_name => {
                    let principal = rel.target_table.to_upper_camel_case();
                    out.push_str(&format!(
                        "    public virtual {principal}? {principal} {{ get; set; }}\n\n"
                    ));
                }
                RelationshipKind::OneToOne if rel.target_table == table.table_name => {
                    let dependent = rel.source_table.to_upper_camel_case();
                    out.push_str(&format!(
                        "    public virtual {dependent}? {dependent} {{ get; set; }}\n\n"
                    ));
                }
                _ => {}
            }
        }

        while out.ends_with("\n\n") {
            out.pop();
        }
        out.push_str("}\n");
        out
    }

    fn configuration_source(&self, table: &Table) -> String {
        let name = entity_name(table);
        let mut out = String::new();
        out.push_str("using Microsoft.EntityFrameworkCore;\n");
        out.push_str("using Microsoft.EntityFrameworkCore.Metadata.Builders;\n");
        out.push_str(&format!("\nnamespace {};\n\n", self.config.namespace));
        out.push_str(&format!(
            "public class {name}Configuration : IEntityTypeConfiguration<{name}>\n{{\n"
        ));
        out.push_str(&format!(
            "    public void Configure(EntityTypeBuilder<{name}> builder)\n    {{\n"
        ));
        out.push_str(&format!(
            "        builder.ToTable(\"{}\", \"{}\");\n",
            table.table_name, table.schema_name
        ));

        let pk: Vec<String> = table
            .primary_key_columns()
            .iter()
            .map(|c| property_name(c))
            .collect();
        match pk.as_slice() {
            [] => out.push_str("        builder.HasNoKey();\n"),
            [single] => out.push_str(&format!("        builder.HasKey(e => e.{single});\n")),
            many => out.push_str(&format!(
                "        builder.HasKey(e => new {{ {} }});\n",
                many.iter()
                    .map(|p| format!("e.{p}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }

        for column in &table.columns {
            let mut line = format!(
                "        builder.Property(e => e.{})\n            .HasColumnName(\"{}\")\n            .HasColumnType(\"{}\")",
                property_name(column),
                column.name,
                column.vendor_type
            );
            if !column.is_nullable {
                line.push_str("\n            .IsRequired()");
            }
            if column.data_type == "string" {
                if let Some(len) = column.max_length.filter(|l| *l > 0) {
                    line.push_str(&format!("\n            .HasMaxLength({len})"));
                }
            }
            if let Some(default) = &column.default_value {
                line.push_str(&format!(
                    "\n            .HasDefaultValueSql(\"{}\")",
                    default.replace('"', "\\\"")
                ));
            }
            if column.is_row_version {
                line.push_str("\n            .IsRowVersion()");
            } else if column.is_identity {
                line.push_str("\n            .ValueGeneratedOnAdd()");
            } else if column.is_computed {
                line.push_str("\n            .ValueGeneratedOnAddOrUpdate()");
            }
            line.push_str(";\n");
            out.push_str(&line);
        }

        for fk in table.foreign_keys.iter().filter(|fk| fk.is_enabled) {
            let principal = fk.primary_table.to_upper_camel_case();
            let fk_columns: Vec<&str> = fk
                .column_pairs
                .iter()
                .map(|p| p.foreign_key_column.as_str())
                .collect();
            let one_to_one = self.config.detect_unique_constraints
                && table.has_unique_index_on(&fk_columns);
            let inverse = if one_to_one {
                "WithOne()".to_string()
            } else {
                format!("WithMany(p => p.{})", self.collection_name(&name))
            };
            let key_selector = if fk.is_composite_key() {
                format!(
                    "e => new {{ {} }}",
                    fk.column_pairs
                        .iter()
                        .map(|p| format!("e.{}", p.foreign_key_column.to_upper_camel_case()))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            } else {
                format!("e => e.{}", fk.foreign_key_column().to_upper_camel_case())
            };
            out.push_str(&format!(
                "        builder.HasOne(e => e.{principal})\n            .{inverse}\n            .HasForeignKey{}({key_selector})\n            .HasConstraintName(\"{}\")\n            .OnDelete({});\n",
                if one_to_one { format!("<{name}>") } else { String::new() },
                fk.name,
                delete_behavior(fk.delete_rule)
            ));
        }

        out.push_str("    }\n}\n");
        out
    }

    fn context_source(&self, tables: &[Table]) -> String {
        let context = &self.config.context_name;
        let mut out = String::new();
        out.push_str("using Microsoft.EntityFrameworkCore;\n");
        out.push_str(&format!("\nnamespace {};\n\n", self.config.namespace));
        out.push_str(&format!("public class {context} : DbContext\n{{\n"));
        out.push_str(&format!(
            "    public {context}(DbContextOptions<{context}> options) : base(options)\n    {{\n    }}\n\n"
        ));
        for table in tables {
            let name = entity_name(table);
            out.push_str(&format!(
                "    public DbSet<{name}> {} {{ get; set; }}\n",
                self.collection_name(&name)
            ));
        }
        out.push_str("\n    protected override void OnModelCreating(ModelBuilder modelBuilder)\n    {\n");
        for table in tables {
            out.push_str(&format!(
                "        modelBuilder.ApplyConfiguration(new {}Configuration());\n",
                entity_name(table)
            ));
        }
        out.push_str("    }\n}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnPair, ForeignKey, Index, IndexColumn};

    fn order_table() -> Table {
        let mut t = Table::new("dbo", "Order");
        let mut id = Column::new("Id", "int", "int");
        id.is_primary_key = true;
        id.is_identity = true;
        t.columns.push(id);
        let mut number = Column::new("order_number", "string", "nvarchar");
        number.max_length = Some(40);
        t.columns.push(number);
        t.indexes.push(Index {
            name: "PK_Order".into(),
            is_unique: true,
            is_primary_key: true,
            is_disabled: false,
            index_type: "CLUSTERED".into(),
            columns: vec![IndexColumn {
                column_name: "Id".into(),
                key_ordinal: 1,
                is_descending: false,
                is_included: false,
            }],
        });
        t
    }

    fn detail_table() -> Table {
        let mut t = Table::new("dbo", "OrderDetail");
        let mut id = Column::new("Id", "int", "int");
        id.is_primary_key = true;
        t.columns.push(id);
        t.columns.push(Column::new("OrderId", "int", "int"));
        t.indexes.push(Index {
            name: "PK_OrderDetail".into(),
            is_unique: true,
            is_primary_key: true,
            is_disabled: false,
            index_type: "CLUSTERED".into(),
            columns: vec![IndexColumn {
                column_name: "Id".into(),
                key_ordinal: 1,
                is_descending: false,
                is_included: false,
            }],
        });
        t.foreign_keys.push(
            ForeignKey::new(
                "FK_OrderDetail_Order",
                "Order",
                vec![ColumnPair {
                    foreign_key_column: "OrderId".into(),
                    primary_key_column: "Id".into(),
                }],
                ReferentialRule::Cascade,
                ReferentialRule::NoAction,
                true,
            )
            .unwrap(),
        );
        t
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Order"), "Orders");
        assert_eq!(pluralize("Address"), "Addresses");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("Day"), "Days");
        assert_eq!(pluralize("Box"), "Boxes");
    }

    #[test]
    fn test_emit_writes_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CodeGeneratorConfig::default();
        config.output = dir.path().to_string_lossy().to_string();

        let tables = vec![order_table(), detail_table()];
        let relationships = vec![Relationship {
            kind: RelationshipKind::OneToMany,
            source_table: "Order".into(),
            target_table: "OrderDetail".into(),
            foreign_key_infos: vec![],
            junction: None,
        }];
        let written = CodeEmitter::new(&config).emit(&tables, &relationships).unwrap();
        assert_eq!(written.len(), 5);
        assert!(dir.path().join("Entities/Order.cs").exists());
        assert!(dir.path().join("Configurations/OrderDetailConfiguration.cs").exists());
        assert!(dir.path().join("AppDbContext.cs").exists());
    }

    #[test]
    fn test_entity_source_contains_typed_properties_and_navigation() {
        let config = CodeGeneratorConfig::default();
        let relationships = vec![Relationship {
            kind: RelationshipKind::OneToMany,
            source_table: "Order".into(),
            target_table: "OrderDetail".into(),
            foreign_key_infos: vec![],
            junction: None,
        }];
        let source = CodeEmitter::new(&config).entity_source(&order_table(), &relationships);
        assert!(source.contains("namespace GeneratedApp.Data;"));
        assert!(source.contains("[Table(\"Order\", Schema = \"dbo\")]"));
        assert!(source.contains("[Key]"));
        assert!(source.contains("public int Id { get; set; }"));
        // snake_case column becomes a Pascal property with a column mapping
        assert!(source.contains("[Column(\"order_number\")]"));
        assert!(source.contains("public string OrderNumber { get; set; }"));
        assert!(source.contains("[MaxLength(40)]"));
        assert!(source.contains(
            "public virtual ICollection<OrderDetail> OrderDetails { get; set; }"
        ));
    }

    #[test]
    fn test_entity_source_without_annotations() {
        let mut config = CodeGeneratorConfig::default();
        config.data_annotations = false;
        let source = CodeEmitter::new(&config).entity_source(&order_table(), &[]);
        assert!(!source.contains("[Key]"));
        assert!(!source.contains("[Table("));
        assert!(source.contains("public int Id { get; set; }"));
    }

    #[test]
    fn test_configuration_source_maps_key_and_foreign_key() {
        let config = CodeGeneratorConfig::default();
        let source = CodeEmitter::new(&config).configuration_source(&detail_table());
        assert!(source.contains("builder.ToTable(\"OrderDetail\", \"dbo\");"));
        assert!(source.contains("builder.HasKey(e => e.Id);"));
        assert!(source.contains(".HasColumnType(\"int\")"));
        assert!(source.contains("builder.HasOne(e => e.Order)"));
        assert!(source.contains(".HasForeignKey(e => e.OrderId)"));
        assert!(source.contains(".HasConstraintName(\"FK_OrderDetail_Order\")"));
        assert!(source.contains(".OnDelete(DeleteBehavior.Cascade);"));
        // stub unique-constraint behavior: collection inverse by default
        assert!(source.contains(".WithMany(p => p.OrderDetails)"));
    }

    #[test]
    fn test_configuration_source_unique_constraint_knob() {
        let mut detail = detail_table();
        detail.indexes.push(Index {
            name: "UX_OrderDetail_OrderId".into(),
            is_unique: true,
            is_primary_key: false,
            is_disabled: false,
            index_type: "NONCLUSTERED".into(),
            columns: vec![IndexColumn {
                column_name: "OrderId".into(),
                key_ordinal: 1,
                is_descending: false,
                is_included: false,
            }],
        });
        let mut config = CodeGeneratorConfig::default();
        config.detect_unique_constraints = true;
        let source = CodeEmitter::new(&config).configuration_source(&detail);
        assert!(source.contains(".WithOne()"));
        assert!(source.contains(".HasForeignKey<OrderDetail>(e => e.OrderId)"));
    }

    #[test]
    fn test_context_source_lists_sets_and_configurations() {
        let config = CodeGeneratorConfig::default();
        let source = CodeEmitter::new(&config).context_source(&[order_table(), detail_table()]);
        assert!(source.contains("public class AppDbContext : DbContext"));
        assert!(source.contains("public DbSet<Order> Orders { get; set; }"));
        assert!(source.contains("modelBuilder.ApplyConfiguration(new OrderConfiguration());"));
    }
}
