// bincode encoding of the records kept in sled trees
use crate::error::{NodeError, Result};
use bincode::config::{self, Configuration};

const RECORD_CONFIG: Configuration = config::standard();

/// Encode a record for one of the sled trees
pub fn serialize<T: bincode::Encode>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(record, RECORD_CONFIG)?)
}

/// Decode a stored record; leftover bytes mean it was not written by [`serialize`]
pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (record, read) = bincode::decode_from_slice(bytes, RECORD_CONFIG)?;
    if read != bytes.len() {
        return Err(NodeError::Serialization(format!(
            "{} trailing bytes after stored record",
            bytes.len() - read
        )));
    }
    Ok(record)
}
