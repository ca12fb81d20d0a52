//! Raw key/value pairs returned by prefix reads

/// One stored pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Sort pairs by raw key byte order.
pub fn sort_by_key(kvs: &mut [KeyValue]) {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));
}
