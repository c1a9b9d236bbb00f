//! Boundary normalization for the many shapes headers arrive in.
//!
//! Callers hand headers over as flat raw arrays (`[name, value, name, value]`),
//! as pair lists, as maps, or as an `http::HeaderMap`. [`HeaderInit`] collects
//! all of them and [`HeaderInit::apply`] funnels them through
//! [`HeaderStore::set`], so every shape gets identical validation and
//! last-set-wins semantics.

use std::collections::{BTreeMap, HashMap};

use http::HeaderMap;

use crate::ensure;
use crate::protocol::header::store::{FieldValue, HeaderStore, IntoFieldValue};
use crate::protocol::{BridgeError, ProtocolError};

#[derive(Debug, Clone, Default)]
pub enum HeaderInit {
    #[default]
    None,
    /// flat `[name, value, name, value, ..]`
    Raw(Vec<String>),
    Pairs(Vec<(String, Option<FieldValue>)>),
    Map(HeaderMap),
}

impl HeaderInit {
    /// Applies every entry to `store` with `set`. Entries with an empty name
    /// are skipped.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::OddRawHeaders`] for a raw array of odd length
    /// - a validation error for the first invalid name or value
    pub fn apply(self, store: &mut HeaderStore) -> Result<(), BridgeError> {
        match self {
            HeaderInit::None => Ok(()),

            HeaderInit::Raw(raw) => {
                ensure!(raw.len() % 2 == 0, ProtocolError::OddRawHeaders { len: raw.len() });
                for pair in raw.chunks_exact(2) {
                    if !pair[0].is_empty() {
                        store.set(&pair[0], pair[1].as_str())?;
                    }
                }
                Ok(())
            }

            HeaderInit::Pairs(pairs) => {
                for (name, value) in pairs {
                    if !name.is_empty() {
                        store.set(&name, value)?;
                    }
                }
                Ok(())
            }

            HeaderInit::Map(headers) => {
                for name in headers.keys() {
                    let values: Vec<String> = headers
                        .get_all(name)
                        .iter()
                        .map(|value| value.as_bytes().iter().map(|&b| char::from(b)).collect())
                        .collect();
                    let value = if values.len() == 1 { values.into_iter().next().map(FieldValue::Single) } else { Some(FieldValue::List(values)) };
                    store.set(name.as_str(), value)?;
                }
                Ok(())
            }
        }
    }

    /// Normalizes into a fresh store.
    pub fn into_store(self) -> Result<HeaderStore, BridgeError> {
        let mut store = HeaderStore::new();
        self.apply(&mut store)?;
        Ok(store)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HeaderInit::None)
    }

    /// Builds a raw flat array form.
    pub fn raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HeaderInit::Raw(raw.into_iter().map(Into::into).collect())
    }
}

impl From<HeaderMap> for HeaderInit {
    fn from(headers: HeaderMap) -> Self {
        HeaderInit::Map(headers)
    }
}

impl<K: Into<String>, V: IntoFieldValue> From<Vec<(K, V)>> for HeaderInit {
    fn from(pairs: Vec<(K, V)>) -> Self {
        HeaderInit::Pairs(pairs.into_iter().map(|(name, value)| (name.into(), value.into_field_value())).collect())
    }
}

impl<K: Into<String>, V: IntoFieldValue, const N: usize> From<[(K, V); N]> for HeaderInit {
    fn from(pairs: [(K, V); N]) -> Self {
        HeaderInit::Pairs(pairs.into_iter().map(|(name, value)| (name.into(), value.into_field_value())).collect())
    }
}

impl<K: Into<String>, V: IntoFieldValue> From<BTreeMap<K, V>> for HeaderInit {
    fn from(map: BTreeMap<K, V>) -> Self {
        HeaderInit::Pairs(map.into_iter().map(|(name, value)| (name.into(), value.into_field_value())).collect())
    }
}

impl<K: Into<String>, V: IntoFieldValue, S> From<HashMap<K, V, S>> for HeaderInit {
    fn from(map: HashMap<K, V, S>) -> Self {
        HeaderInit::Pairs(map.into_iter().map(|(name, value)| (name.into(), value.into_field_value())).collect())
    }
}
