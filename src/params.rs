//! Dynamic, ABI-shaped parameter values.
//!
//! Desired vault configuration is declared as [`ParamMap`]s (from plan files
//! or typed parameter schemas), while contract reads come back as
//! [`RawStruct`] blobs carrying every tuple field twice: once under its
//! positional index and once under its name. [`normalize`] strips the
//! positional duplicates so the two sides can be compared.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use alloy::primitives::{Address, B256, Bytes, I256, U256, hex};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Named parameter mapping. Key order is irrelevant for equality.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// A single ABI-compatible value.
///
/// Numeric equality is independent of width and signedness:
/// `Uint(5) == Int(5)`. A [`RawStruct`] compared against a `Struct`
/// is normalized first.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Bool(bool),
    Uint(U256),
    Int(I256),
    Address(Address),
    FixedBytes(B256),
    Bytes(Bytes),
    String(String),
    List(Vec<ParamValue>),
    Struct(ParamMap),
    Raw(RawStruct),
}

/// Struct-like read result with positional and named entries.
///
/// Mirrors what a contract read of a named tuple returns: entries
/// `"0"`, `"1"`, ... followed by the same values under their field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStruct {
    entries: Vec<(String, ParamValue)>,
}

impl RawStruct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a blob from tuple fields, emitting positional keys for every
    /// field and named keys for the fields that have a name.
    pub fn from_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (Option<String>, ParamValue)>,
    {
        let fields: Vec<_> = fields.into_iter().collect();
        let mut raw = Self::new();

        for (index, (_, value)) in fields.iter().enumerate() {
            raw.push(index.to_string(), value.clone());
        }

        for (name, value) in fields {
            if let Some(name) = name.filter(|name| !name.is_empty()) {
                raw.push(name, value);
            }
        }

        raw
    }

    pub fn push(&mut self, key: impl Into<String>, value: ParamValue) {
        self.entries.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_positional(key: &str) -> bool {
    key.parse::<i128>().is_ok()
}

/// Converts a struct-like value into a plain keyed mapping.
///
/// Keeps only keys that do not parse as integers; nested values are
/// carried over unmodified. Never fails: scalars, lists, empty blobs and
/// fully positional blobs all yield an empty map.
pub fn normalize(value: &ParamValue) -> ParamMap {
    match value {
        ParamValue::Raw(raw) => raw
            .iter()
            .filter(|(key, _)| !is_positional(key))
            .map(|(key, value)| (key.to_owned(), value.clone()))
            .collect(),
        ParamValue::Struct(map) => map
            .iter()
            .filter(|(key, _)| !is_positional(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => ParamMap::new(),
    }
}

impl ParamValue {
    pub const MAX_UINT: Self = Self::Uint(U256::MAX);

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(value) => Some(*value),
            Self::Int(value) if !value.is_negative() => Some(value.into_raw()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Looks up a named field on a struct-like value.
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Struct(map) => map.get(name),
            Self::Raw(raw) => raw.get(name),
            _ => None,
        }
    }

    /// Parses a string the way plan and config files spell values.
    ///
    /// `0x` + 40 hex digits is an address, `0x` + 64 hex digits a word,
    /// other `0x` strings raw bytes, decimal digits an unsigned integer
    /// (optionally negative), `max`/`unbounded` the largest `uint256`.
    /// Anything else stays a string.
    pub fn classify(text: &str) -> Self {
        if text.eq_ignore_ascii_case("max") || text.eq_ignore_ascii_case("unbounded") {
            return Self::MAX_UINT;
        }

        if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            let parsed = match digits.len() {
                40 => Address::from_str(text).ok().map(Self::Address),
                64 => B256::from_str(text).ok().map(Self::FixedBytes),
                _ => hex::decode(digits).ok().map(|bytes| Self::Bytes(bytes.into())),
            };
            return parsed.unwrap_or_else(|| Self::String(text.to_owned()));
        }

        let unsigned = text.strip_prefix('-').unwrap_or(text);
        if !unsigned.is_empty() && unsigned.bytes().all(|byte| byte.is_ascii_digit()) {
            if text.starts_with('-') {
                if let Ok(value) = I256::from_dec_str(text) {
                    return Self::Int(value);
                }
            } else if let Ok(value) = U256::from_str_radix(text, 10) {
                return Self::Uint(value);
            }
        }

        Self::String(text.to_owned())
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(lhs), Self::Bool(rhs)) => lhs == rhs,
            (Self::Uint(lhs), Self::Uint(rhs)) => lhs == rhs,
            (Self::Int(lhs), Self::Int(rhs)) => lhs == rhs,
            (Self::Uint(unsigned), Self::Int(signed))
            | (Self::Int(signed), Self::Uint(unsigned)) => {
                !signed.is_negative() && signed.into_raw() == *unsigned
            }
            (Self::Address(lhs), Self::Address(rhs)) => lhs == rhs,
            (Self::FixedBytes(lhs), Self::FixedBytes(rhs)) => lhs == rhs,
            (Self::Bytes(lhs), Self::Bytes(rhs)) => lhs == rhs,
            (Self::String(lhs), Self::String(rhs)) => lhs == rhs,
            (Self::List(lhs), Self::List(rhs)) => lhs == rhs,
            (Self::Struct(lhs), Self::Struct(rhs)) => lhs == rhs,
            (Self::Raw(lhs), Self::Raw(rhs)) => lhs == rhs,
            (Self::Raw(_), Self::Struct(map)) => normalize(self) == *map,
            (Self::Struct(map), Self::Raw(_)) => *map == normalize(other),
            _ => false,
        }
    }
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Address(value) => write!(f, "{value}"),
            Self::FixedBytes(value) => write!(f, "{value}"),
            Self::Bytes(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
            Self::List(values) => {
                write!(f, "[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::Struct(map) => fmt_entries(f, map.iter().map(|(k, v)| (k.as_str(), v))),
            Self::Raw(raw) => fmt_entries(f, raw.iter()),
        }
    }
}

fn fmt_entries<'a>(
    f: &mut fmt::Formatter<'_>,
    entries: impl Iterator<Item = (&'a str, &'a ParamValue)>,
) -> fmt::Result {
    write!(f, "{{")?;
    for (index, (key, value)) in entries.enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    write!(f, "}}")
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<U256> for ParamValue {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<I256> for ParamValue {
    fn from(value: I256) -> Self {
        Self::Int(value)
    }
}

impl From<Address> for ParamValue {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<B256> for ParamValue {
    fn from(value: B256) -> Self {
        Self::FixedBytes(value)
    }
}

impl From<Bytes> for ParamValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<ParamMap> for ParamValue {
    fn from(value: ParamMap) -> Self {
        Self::Struct(value)
    }
}

impl From<RawStruct> for ParamValue {
    fn from(value: RawStruct) -> Self {
        Self::Raw(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Uint(value) => serializer.serialize_str(&value.to_string()),
            Self::Int(value) => serializer.serialize_str(&value.to_string()),
            Self::Address(value) => serializer.serialize_str(&value.to_checksum(None)),
            Self::FixedBytes(value) => serializer.serialize_str(&value.to_string()),
            Self::Bytes(value) => serializer.serialize_str(&value.to_string()),
            Self::String(value) => serializer.serialize_str(value),
            Self::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Struct(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Self::Raw(raw) => {
                let mut out = serializer.serialize_map(Some(raw.len()))?;
                for (key, value) in raw.iter() {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParamValueVisitor)
    }
}

struct ParamValueVisitor;

impl<'de> Visitor<'de> for ParamValueVisitor {
    type Value = ParamValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, integer, string, array or table")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(ParamValue::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(u64::try_from(value).map_or_else(
            |_| ParamValue::Int(I256::try_from(value).unwrap_or(I256::MIN)),
            ParamValue::from,
        ))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(ParamValue::from(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Err(E::custom(format!(
            "floating point value {value} is not an ABI value; use a string or an integer"
        )))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(ParamValue::classify(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(ParamValue::List(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = ParamMap::new();
        while let Some((key, value)) = access.next_entry::<String, ParamValue>()? {
            map.insert(key, value);
        }
        Ok(ParamValue::Struct(map))
    }
}

/// Builds a [`ParamMap`] from `key => value` pairs.
#[macro_export]
macro_rules! param_map {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::params::ParamMap::new();
        $(map.insert(::std::string::String::from($key), $crate::params::ParamValue::from($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use proptest::prelude::*;

    use super::*;

    const TREASURY: Address = address!("0x1111111111111111111111111111111111111111");

    fn delayed_blob(treasury: Address, redirects: Vec<u64>) -> ParamValue {
        ParamValue::Raw(RawStruct::from_fields([
            (Some("strategyTreasury".to_owned()), treasury.into()),
            (Some("redirects".to_owned()), redirects.into()),
        ]))
    }

    #[test]
    fn normalize_keeps_only_named_fields() {
        let blob = delayed_blob(TREASURY, vec![1, 2]);

        let normalized = normalize(&blob);

        assert_eq!(
            normalized,
            param_map! {
                "strategyTreasury" => TREASURY,
                "redirects" => vec![1u64, 2],
            }
        );
    }

    #[test]
    fn normalize_of_empty_or_positional_blob_is_empty() {
        assert!(normalize(&ParamValue::Raw(RawStruct::new())).is_empty());

        let positional = RawStruct::from_fields([(None, ParamValue::from(7u64))]);
        assert!(normalize(&ParamValue::Raw(positional)).is_empty());
    }

    #[test]
    fn normalize_of_scalar_is_empty() {
        assert!(normalize(&ParamValue::from(U256::from(3))).is_empty());
        assert!(normalize(&ParamValue::from(vec![1u64])).is_empty());
    }

    #[test]
    fn normalize_preserves_nested_raw_values() {
        let inner = RawStruct::from_fields([(Some("trader".to_owned()), TREASURY.into())]);
        let outer = ParamValue::Raw(RawStruct::from_fields([(
            Some("nested".to_owned()),
            ParamValue::Raw(inner.clone()),
        )]));

        let normalized = normalize(&outer);

        assert_eq!(normalized.get("nested"), Some(&ParamValue::Raw(inner)));
    }

    #[test]
    fn numeric_equality_ignores_signedness() {
        let unsigned = ParamValue::Uint(U256::from(5));
        let signed = ParamValue::Int(I256::try_from(5).unwrap());
        let negative = ParamValue::Int(I256::try_from(-5).unwrap());

        assert_eq!(unsigned, signed);
        assert_eq!(signed, unsigned);
        assert_ne!(unsigned, negative);
    }

    #[test]
    fn raw_struct_equals_its_normalized_struct() {
        let blob = delayed_blob(TREASURY, vec![3]);
        let expected = ParamValue::Struct(param_map! {
            "strategyTreasury" => TREASURY,
            "redirects" => vec![3u64],
        });

        assert_eq!(blob, expected);
        assert_eq!(expected, blob);
    }

    #[test]
    fn classify_recognises_value_shapes() {
        assert_eq!(
            ParamValue::classify("0x1111111111111111111111111111111111111111"),
            ParamValue::Address(TREASURY)
        );
        assert_eq!(ParamValue::classify("max"), ParamValue::MAX_UINT);
        assert_eq!(ParamValue::classify("Unbounded"), ParamValue::MAX_UINT);
        assert_eq!(
            ParamValue::classify("2000000000"),
            ParamValue::Uint(U256::from(2_000_000_000u64))
        );
        assert_eq!(
            ParamValue::classify("-4"),
            ParamValue::Int(I256::try_from(-4).unwrap())
        );
        assert_eq!(
            ParamValue::classify("0xdeadbeef"),
            ParamValue::Bytes(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert_eq!(ParamValue::classify("MSLP"), ParamValue::from("MSLP"));
        assert_eq!(ParamValue::classify("0xnothex"), ParamValue::from("0xnothex"));
    }

    #[test]
    fn deserializes_toml_tables() {
        let parsed: ParamMap = toml::from_str(
            r#"
            strategyTreasury = "0x1111111111111111111111111111111111111111"
            managementFee = 2000000000
            limits = ["max", "max"]
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed,
            param_map! {
                "strategyTreasury" => TREASURY,
                "managementFee" => 2_000_000_000u64,
                "limits" => vec![U256::MAX, U256::MAX],
            }
        );
    }

    #[test]
    fn serialized_values_classify_back_to_themselves() {
        let original = ParamValue::Struct(param_map! {
            "token" => TREASURY,
            "limit" => U256::MAX,
            "name" => "MStrategy LP Token",
        });

        let json = serde_json::to_string(&original).unwrap();
        let parsed: ParamValue = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, original);
    }

    fn arb_leaf() -> impl Strategy<Value = ParamValue> {
        prop_oneof![
            any::<bool>().prop_map(ParamValue::Bool),
            any::<u64>().prop_map(ParamValue::from),
            any::<[u8; 20]>().prop_map(|bytes| ParamValue::Address(Address::from(bytes))),
            "[a-z]{0,8}".prop_map(ParamValue::String),
        ]
    }

    fn arb_fields() -> impl Strategy<Value = Vec<(Option<String>, ParamValue)>> {
        prop::collection::vec(
            (prop::option::of("[a-zA-Z][a-zA-Z0-9]{0,10}"), arb_leaf()),
            0..8,
        )
    }

    proptest! {
        #[test]
        fn normalize_returns_exactly_the_named_subset(fields in arb_fields()) {
            let blob = ParamValue::Raw(RawStruct::from_fields(fields.clone()));

            let normalized = normalize(&blob);

            let expected: ParamMap = fields
                .into_iter()
                .rev()
                .filter_map(|(name, value)| name.map(|name| (name, value)))
                .fold(ParamMap::new(), |mut map, (name, value)| {
                    map.entry(name).or_insert(value);
                    map
                });
            prop_assert_eq!(normalized.len(), expected.len());
            for key in expected.keys() {
                prop_assert!(normalized.contains_key(key));
            }
            prop_assert!(normalized.keys().all(|key| !is_positional(key)));
        }

        #[test]
        fn normalize_is_idempotent(fields in arb_fields()) {
            let blob = ParamValue::Raw(RawStruct::from_fields(fields));

            let once = normalize(&blob);
            let twice = normalize(&ParamValue::Struct(once.clone()));

            prop_assert_eq!(once, twice);
        }
    }
}
