/// Row of the `kv` table (see migrations/) as read at startup. `value` holds
/// the JSON record.
#[derive(Debug, sqlx::FromRow)]
pub struct KvRow {
    pub key: String,
    pub value: Vec<u8>,
}
