use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::protocol::ValidationError;
use crate::protocol::header::validate::{validate_header_name, validate_header_value};

/// The only header whose materialized value keeps every repetition as a list.
pub const SET_COOKIE: &str = "set-cookie";

/// A header value as seen by users: one string, or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Returns the value if it is a single string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Single(value) => Some(value),
            FieldValue::List(_) => None,
        }
    }

    /// Iterates over every contained value in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            FieldValue::Single(value) => std::slice::from_ref(value),
            FieldValue::List(values) => values,
        };
        values.iter().map(String::as_str)
    }

    fn into_values(self) -> Vec<String> {
        match self {
            FieldValue::Single(value) => vec![value],
            FieldValue::List(values) => values,
        }
    }
}

/// Conversion into a header value. Numbers are coerced to their decimal
/// representation; `None` models a value that was never provided and is
/// rejected by the store.
pub trait IntoFieldValue {
    fn into_field_value(self) -> Option<FieldValue>;
}

impl IntoFieldValue for FieldValue {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(self)
    }
}

impl IntoFieldValue for &str {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::Single(self.to_owned()))
    }
}

impl IntoFieldValue for String {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::Single(self))
    }
}

impl IntoFieldValue for &String {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::Single(self.clone()))
    }
}

impl IntoFieldValue for Vec<String> {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::List(self))
    }
}

impl IntoFieldValue for Vec<&str> {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::List(self.into_iter().map(str::to_owned).collect()))
    }
}

impl IntoFieldValue for &[&str] {
    fn into_field_value(self) -> Option<FieldValue> {
        Some(FieldValue::List(self.iter().map(|v| (*v).to_owned()).collect()))
    }
}

impl<T: IntoFieldValue> IntoFieldValue for Option<T> {
    fn into_field_value(self) -> Option<FieldValue> {
        self.and_then(IntoFieldValue::into_field_value)
    }
}

macro_rules! numeric_field_value {
    ($($ty:ty),*) => {
        $(
            impl IntoFieldValue for $ty {
                fn into_field_value(self) -> Option<FieldValue> {
                    Some(FieldValue::Single(self.to_string()))
                }
            }
        )*
    };
}

numeric_field_value!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

#[derive(Debug, Clone)]
struct Entry {
    /// name as given by the caller
    name: String,
    /// lowercase lookup key
    key: String,
    value: String,
}

/// The two materialized forms of a header collection.
///
/// `map` is keyed by lowercase name; repeated values are joined with `", "`
/// except for `set-cookie`, which always materializes as a list. `raw_pairs`
/// keeps one `(name, value)` pair per value in the original casing and order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    pub map: BTreeMap<String, FieldValue>,
    pub raw_pairs: Vec<(String, String)>,
}

impl Materialized {
    fn with_capacity(capacity: usize) -> Self {
        Self { map: BTreeMap::new(), raw_pairs: Vec::with_capacity(capacity) }
    }

    fn push(&mut self, name: &str, key: &str, value: String) {
        self.raw_pairs.push((name.to_owned(), value.clone()));
        insert_field(&mut self.map, key, value);
    }

    /// Slow path: materializes an arbitrary, unvalidated header source.
    ///
    /// Produces exactly what [`HeaderStore::materialize`] produces for a store
    /// holding the same pairs.
    pub fn from_fields<K, I>(fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let mut materialized = Self::default();
        for (name, value) in fields {
            let name = name.as_ref();
            let key = name.to_ascii_lowercase();
            for value in value.into_values() {
                materialized.push(name, &key, value);
            }
        }
        materialized
    }

    /// Materializes headers received from a transport.
    ///
    /// Header bytes are read as latin-1 so obs-text survives unchanged.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut materialized = Self::with_capacity(headers.len());
        for (name, value) in headers {
            let value: String = value.as_bytes().iter().map(|&b| char::from(b)).collect();
            materialized.push(name.as_str(), name.as_str(), value);
        }
        materialized
    }

    /// Looks up a materialized value, ignoring the casing of `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.map.get(&name.to_ascii_lowercase())
    }
}

fn insert_field(map: &mut BTreeMap<String, FieldValue>, key: &str, value: String) {
    if key == SET_COOKIE {
        match map.get_mut(key) {
            Some(FieldValue::List(values)) => values.push(value),
            _ => {
                map.insert(key.to_owned(), FieldValue::List(vec![value]));
            }
        }
        return;
    }

    match map.get_mut(key) {
        Some(FieldValue::Single(existing)) => {
            existing.push_str(", ");
            existing.push_str(&value);
        }
        _ => {
            map.insert(key.to_owned(), FieldValue::Single(value));
        }
    }
}

/// Case-insensitive, ordered header multimap.
///
/// `set` replaces every value of a name, keeping the position of its first
/// occurrence; `append` always adds a value at the end. Every name and value
/// is validated before the store is touched, so a rejected call leaves the
/// store unchanged.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<Entry>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn checked_values(name: &str, value: Option<FieldValue>) -> Result<Vec<String>, ValidationError> {
        validate_header_name(name)?;
        let Some(value) = value else {
            return Err(ValidationError::invalid_header_value(name, "value is undefined"));
        };
        let values = value.into_values();
        for value in &values {
            validate_header_value(name, Some(value))?;
        }
        Ok(values)
    }

    fn to_entries(name: &str, values: Vec<String>) -> impl Iterator<Item = Entry> + '_ {
        let key = name.to_ascii_lowercase();
        values.into_iter().map(move |value| Entry { name: name.to_owned(), key: key.clone(), value })
    }

    /// Replaces all values of `name`.
    pub fn set<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<(), ValidationError> {
        let values = Self::checked_values(name, value.into_field_value())?;
        let key = name.to_ascii_lowercase();

        let position = self.entries.iter().position(|entry| entry.key == key);
        self.entries.retain(|entry| entry.key != key);

        let entries = Self::to_entries(name, values);
        match position {
            Some(index) => {
                self.entries.splice(index..index, entries);
            }
            None => self.entries.extend(entries),
        }
        Ok(())
    }

    /// Adds values to `name`, keeping existing ones.
    pub fn append<V: IntoFieldValue>(&mut self, name: &str, value: V) -> Result<(), ValidationError> {
        let values = Self::checked_values(name, value.into_field_value())?;
        self.entries.extend(Self::to_entries(name, values));
        Ok(())
    }

    /// Returns the value of `name`, repeated values joined with `", "`.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    /// Returns every value of `name` in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let key = name.to_ascii_lowercase();
        self.entries.iter().filter(|entry| entry.key == key).map(|entry| entry.value.as_str()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.entries.iter().any(|entry| entry.key == key)
    }

    /// Removes every value of `name`, returning whether anything was removed.
    pub fn delete(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|entry| entry.key != key);
        before != self.entries.len()
    }

    /// Lowercase names in order of first insertion.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.key) {
                names.push(entry.key.clone());
            }
        }
        names
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|entry| (entry.name.as_str(), entry.value.as_str()))
    }

    /// Fast path: the entries are already validated and keyed.
    pub fn materialize(&self) -> Materialized {
        let mut materialized = Materialized::with_capacity(self.entries.len());
        for entry in &self.entries {
            materialized.push(&entry.name, &entry.key, entry.value.clone());
        }
        materialized
    }

    /// Converts the store into the transport's header map.
    ///
    /// Values are written as latin-1 bytes, matching [`Materialized::from_header_map`].
    pub fn to_header_map(&self) -> Result<HeaderMap, ValidationError> {
        let mut headers = HeaderMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            let name = HeaderName::from_bytes(entry.key.as_bytes()).map_err(|_e| ValidationError::invalid_header_name(&entry.name))?;
            let bytes = entry
                .value
                .chars()
                .map(|c| u8::try_from(u32::from(c)))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_e| ValidationError::invalid_header_value(&entry.name, "character out of latin-1 range"))?;
            let value = HeaderValue::from_bytes(&bytes).map_err(|e| ValidationError::invalid_header_value(&entry.name, e))?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}
