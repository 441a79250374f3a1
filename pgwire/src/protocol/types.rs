//! Built-in type OIDs and their names
//!
//! Only the types a diagnostic client is likely to meet are listed; any
//! other OID resolves to `"unknown"`.

/// Type OIDs from the server's `pg_type` catalog
#[allow(missing_docs)]
pub mod oid {
    pub const BOOL: i32 = 16;
    pub const BYTEA: i32 = 17;
    pub const CHAR: i32 = 18;
    pub const NAME: i32 = 19;
    pub const INT8: i32 = 20;
    pub const INT2: i32 = 21;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const OID: i32 = 26;
    pub const JSON: i32 = 114;
    pub const XML: i32 = 142;
    pub const FLOAT4: i32 = 700;
    pub const FLOAT8: i32 = 701;
    pub const UNKNOWN: i32 = 705;
    pub const MONEY: i32 = 790;
    pub const INET: i32 = 869;
    pub const BOOL_ARRAY: i32 = 1000;
    pub const INT2_ARRAY: i32 = 1005;
    pub const INT4_ARRAY: i32 = 1007;
    pub const TEXT_ARRAY: i32 = 1009;
    pub const VARCHAR_ARRAY: i32 = 1015;
    pub const INT8_ARRAY: i32 = 1016;
    pub const FLOAT8_ARRAY: i32 = 1022;
    pub const BPCHAR: i32 = 1042;
    pub const VARCHAR: i32 = 1043;
    pub const DATE: i32 = 1082;
    pub const TIME: i32 = 1083;
    pub const TIMESTAMP: i32 = 1114;
    pub const TIMESTAMPTZ: i32 = 1184;
    pub const INTERVAL: i32 = 1186;
    pub const TIMETZ: i32 = 1266;
    pub const NUMERIC: i32 = 1700;
    pub const VOID: i32 = 2278;
    pub const UUID: i32 = 2950;
    pub const UUID_ARRAY: i32 = 2951;
    pub const JSONB: i32 = 3802;
    pub const JSONB_ARRAY: i32 = 3807;
}

const TYPE_NAMES: &[(i32, &str)] = &[
    (oid::BOOL, "bool"),
    (oid::BYTEA, "bytea"),
    (oid::CHAR, "char"),
    (oid::NAME, "name"),
    (oid::INT8, "int8"),
    (oid::INT2, "int2"),
    (oid::INT4, "int4"),
    (oid::TEXT, "text"),
    (oid::OID, "oid"),
    (oid::JSON, "json"),
    (oid::XML, "xml"),
    (oid::FLOAT4, "float4"),
    (oid::FLOAT8, "float8"),
    (oid::UNKNOWN, "unknown"),
    (oid::MONEY, "money"),
    (oid::INET, "inet"),
    (oid::BOOL_ARRAY, "bool[]"),
    (oid::INT2_ARRAY, "int2[]"),
    (oid::INT4_ARRAY, "int4[]"),
    (oid::TEXT_ARRAY, "text[]"),
    (oid::VARCHAR_ARRAY, "varchar[]"),
    (oid::INT8_ARRAY, "int8[]"),
    (oid::FLOAT8_ARRAY, "float8[]"),
    (oid::BPCHAR, "bpchar"),
    (oid::VARCHAR, "varchar"),
    (oid::DATE, "date"),
    (oid::TIME, "time"),
    (oid::TIMESTAMP, "timestamp"),
    (oid::TIMESTAMPTZ, "timestamptz"),
    (oid::INTERVAL, "interval"),
    (oid::TIMETZ, "timetz"),
    (oid::NUMERIC, "numeric"),
    (oid::VOID, "void"),
    (oid::UUID, "uuid"),
    (oid::UUID_ARRAY, "uuid[]"),
    (oid::JSONB, "jsonb"),
    (oid::JSONB_ARRAY, "jsonb[]"),
];

/// Readable name for a type OID
pub fn type_name(type_oid: i32) -> &'static str {
    TYPE_NAMES
        .iter()
        .find(|(oid, _)| *oid == type_oid)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}
