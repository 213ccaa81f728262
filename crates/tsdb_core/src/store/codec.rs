//! Line-oriented row encoding for data files.
//!
//! Each row is one JSON array followed by `\n`, so blocks can be appended
//! without rewriting earlier data.

use crate::model::table::{DataBatch, DataRow};

pub fn encode_batch(batch: &DataBatch) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for row in &batch.rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

pub fn decode_rows(bytes: &[u8]) -> serde_json::Result<Vec<DataRow>> {
    bytes
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice::<DataRow>(line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{decode_rows, encode_batch};
    use crate::model::table::{DataBatch, DataRow, Value};

    #[test]
    fn encoded_blocks_concatenate() {
        let first = DataBatch::new(vec![DataRow::new(vec![
            Value::Timestamp(1),
            Value::Text("line\nbreak".to_string()),
        ])]);
        let second = DataBatch::new(vec![DataRow::new(vec![
            Value::Timestamp(2),
            Value::Float(1.5),
        ])]);

        let mut bytes = encode_batch(&first).unwrap();
        bytes.extend(encode_batch(&second).unwrap());

        let rows = decode_rows(&bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], first.rows[0]);
        assert_eq!(rows[1], second.rows[0]);
    }

    #[test]
    fn truncated_line_is_an_error() {
        assert!(decode_rows(b"[{\"t\":\"timestamp\"").is_err());
    }
}
