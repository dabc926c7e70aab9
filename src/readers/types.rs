use crate::models::ReferentialRule;

/// Maps a vendor referential-action spelling onto the closed rule set.
/// Handles the SQL Server `_`-separated descriptors, the information_schema
/// spellings, and unknown input (defaults to NO ACTION).
pub fn normalize_rule(vendor: &str) -> ReferentialRule {
    match vendor.trim().to_ascii_uppercase().replace('_', " ").as_str() {
        "CASCADE" => ReferentialRule::Cascade,
        "RESTRICT" => ReferentialRule::Restrict,
        "SET NULL" => ReferentialRule::SetNull,
        "SET DEFAULT" => ReferentialRule::SetDefault,
        _ => ReferentialRule::NoAction,
    }
}

/// pg_constraint stores actions as single characters.
pub fn rule_from_pg_char(c: &str) -> ReferentialRule {
    match c {
        "c" => ReferentialRule::Cascade,
        "r" => ReferentialRule::Restrict,
        "n" => ReferentialRule::SetNull,
        "d" => ReferentialRule::SetDefault,
        _ => ReferentialRule::NoAction,
    }
}

/// Canonical token for a SQL Server catalog type. Unmatched vendor types are
/// passed through unchanged.
pub fn canonical_sqlserver_type(vendor: &str) -> String {
    match vendor.to_ascii_lowercase().as_str() {
        "bit" => "bool",
        "tinyint" => "byte",
        "smallint" => "short",
        "int" => "int",
        "bigint" => "long",
        "real" => "float",
        "float" => "double",
        "decimal" | "numeric" | "money" | "smallmoney" => "decimal",
        "date" | "datetime" | "datetime2" | "smalldatetime" => "DateTime",
        "datetimeoffset" => "DateTimeOffset",
        "time" => "TimeSpan",
        "uniqueidentifier" => "Guid",
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => "byte[]",
        "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext" | "xml" => "string",
        _ => return vendor.to_string(),
    }
    .to_string()
}

/// Canonical token for a MySQL column. `column_type` is the full spelling
/// (`tinyint(1)`, `int unsigned`, ...) used to tell booleans apart.
pub fn canonical_mysql_type(data_type: &str, column_type: &str) -> String {
    let lowered = data_type.to_ascii_lowercase();
    if lowered == "tinyint" && column_type.to_ascii_lowercase().starts_with("tinyint(1)") {
        return "bool".to_string();
    }
    match lowered.as_str() {
        "bit" => "bool",
        "tinyint" => "byte",
        "smallint" | "year" => "short",
        "mediumint" | "int" => "int",
        "bigint" => "long",
        "float" => "float",
        "double" => "double",
        "decimal" | "numeric" => "decimal",
        "date" | "datetime" | "timestamp" => "DateTime",
        "time" => "TimeSpan",
        "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set"
        | "json" => "string",
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => "byte[]",
        _ => return data_type.to_string(),
    }
    .to_string()
}

/// A PostgreSQL type spelling split into its base name and size modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgParsedType {
    /// Canonical token (or the stripped vendor base when unmatched).
    pub data_type: String,
    /// Vendor base name with modifiers removed.
    pub base: String,
    pub max_length: Option<i64>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

/// Splits a `format_type` spelling such as `character varying(255)` or
/// `numeric(10,2)` into base + modifiers and maps the base onto the
/// canonical set. An unmodified `numeric` keeps the decimal invariant
/// satisfied with precision 18, scale 2.
pub fn parse_postgres_type(raw: &str) -> PgParsedType {
    let raw = raw.trim();
    let (base, modifier) = match (raw.find('('), raw.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let mut base = raw[..open].trim().to_string();
            // keep any suffix after the modifier, e.g. `time(3) with time zone`
            let suffix = raw[close + 1..].trim();
            if !suffix.is_empty() {
                base.push(' ');
                base.push_str(suffix);
            }
            (base, Some(&raw[open + 1..close]))
        }
        _ => (raw.to_string(), None),
    };

    let lowered = base.to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "boolean" | "bool" => "bool",
        "smallint" | "int2" => "short",
        "integer" | "int" | "int4" => "int",
        "bigint" | "int8" => "long",
        "real" | "float4" => "float",
        "double precision" | "float8" => "double",
        "numeric" | "decimal" | "money" => "decimal",
        "date" | "timestamp" | "timestamp without time zone" => "DateTime",
        "timestamptz" | "timestamp with time zone" => "DateTimeOffset",
        "time" | "time without time zone" | "time with time zone" | "interval" => "TimeSpan",
        "uuid" => "Guid",
        "bytea" => "byte[]",
        "character varying" | "varchar" | "character" | "char" | "bpchar" | "text" | "name"
        | "citext" | "json" | "jsonb" | "xml" => "string",
        _ => "",
    };

    let mut parsed = PgParsedType {
        data_type: if canonical.is_empty() {
            base.clone()
        } else {
            canonical.to_string()
        },
        base,
        max_length: None,
        precision: None,
        scale: None,
    };

    if let Some(modifier) = modifier {
        let parts: Vec<&str> = modifier.split(',').map(str::trim).collect();
        if parsed.data_type == "decimal" {
            parsed.precision = parts.first().and_then(|p| p.parse().ok());
            parsed.scale = parts.get(1).and_then(|p| p.parse().ok()).or(Some(0));
        } else if parsed.data_type == "string" {
            parsed.max_length = parts.first().and_then(|p| p.parse().ok());
        }
        // other modifiers (e.g. time precision) are dropped with the spelling
    }
    if parsed.data_type == "decimal" && parsed.precision.is_none() {
        parsed.precision = Some(18);
        parsed.scale = Some(2);
    }
    // unbounded varchar keeps a length marker, like SQL Server's MAX types
    if parsed.max_length.is_none()
        && matches!(lowered.as_str(), "character varying" | "varchar")
    {
        parsed.max_length = Some(-1);
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_normalization_covers_vendor_spellings() {
        assert_eq!(normalize_rule("NO_ACTION"), ReferentialRule::NoAction);
        assert_eq!(normalize_rule("no action"), ReferentialRule::NoAction);
        assert_eq!(normalize_rule("CASCADE"), ReferentialRule::Cascade);
        assert_eq!(normalize_rule("SET_NULL"), ReferentialRule::SetNull);
        assert_eq!(normalize_rule("SET DEFAULT"), ReferentialRule::SetDefault);
        assert_eq!(normalize_rule("RESTRICT"), ReferentialRule::Restrict);
        // unknown tokens fall back rather than leaking vendor spellings
        assert_eq!(normalize_rule("whatever"), ReferentialRule::NoAction);
    }

    #[test]
    fn test_pg_char_rules() {
        assert_eq!(rule_from_pg_char("a"), ReferentialRule::NoAction);
        assert_eq!(rule_from_pg_char("c"), ReferentialRule::Cascade);
        assert_eq!(rule_from_pg_char("n"), ReferentialRule::SetNull);
        assert_eq!(rule_from_pg_char("d"), ReferentialRule::SetDefault);
        assert_eq!(rule_from_pg_char("r"), ReferentialRule::Restrict);
    }

    #[test]
    fn test_sqlserver_canonical_tokens() {
        assert_eq!(canonical_sqlserver_type("nvarchar"), "string");
        assert_eq!(canonical_sqlserver_type("INT"), "int");
        assert_eq!(canonical_sqlserver_type("uniqueidentifier"), "Guid");
        assert_eq!(canonical_sqlserver_type("rowversion"), "byte[]");
        assert_eq!(canonical_sqlserver_type("datetimeoffset"), "DateTimeOffset");
        // unmatched vendor tokens pass through
        assert_eq!(canonical_sqlserver_type("geography"), "geography");
    }

    #[test]
    fn test_mysql_tinyint1_is_bool() {
        assert_eq!(canonical_mysql_type("tinyint", "tinyint(1)"), "bool");
        assert_eq!(canonical_mysql_type("tinyint", "tinyint(4)"), "byte");
        assert_eq!(canonical_mysql_type("varchar", "varchar(80)"), "string");
        assert_eq!(canonical_mysql_type("geometry", "geometry"), "geometry");
    }

    #[test]
    fn test_postgres_varchar_modifier() {
        let t = parse_postgres_type("character varying(255)");
        assert_eq!(t.data_type, "string");
        assert_eq!(t.base, "character varying");
        assert_eq!(t.max_length, Some(255));
    }

    #[test]
    fn test_postgres_numeric_modifier() {
        let t = parse_postgres_type("numeric(10,2)");
        assert_eq!(t.data_type, "decimal");
        assert_eq!(t.precision, Some(10));
        assert_eq!(t.scale, Some(2));
    }

    #[test]
    fn test_postgres_unbounded_varchar_keeps_length_marker() {
        let t = parse_postgres_type("character varying");
        assert_eq!(t.data_type, "string");
        assert_eq!(t.max_length, Some(-1));
        // text is unbounded by nature and carries no marker
        assert_eq!(parse_postgres_type("text").max_length, None);
    }

    #[test]
    fn test_postgres_bare_numeric_gets_default_precision() {
        let t = parse_postgres_type("numeric");
        assert_eq!(t.data_type, "decimal");
        assert_eq!(t.precision, Some(18));
        assert_eq!(t.scale, Some(2));
    }

    #[test]
    fn test_postgres_timestamptz_with_precision() {
        let t = parse_postgres_type("timestamp(3) with time zone");
        assert_eq!(t.data_type, "DateTimeOffset");
        assert_eq!(t.base, "timestamp with time zone");
        assert_eq!(t.max_length, None);
    }

    #[test]
    fn test_postgres_unmatched_type_passes_through() {
        let t = parse_postgres_type("tsvector");
        assert_eq!(t.data_type, "tsvector");
    }
}
