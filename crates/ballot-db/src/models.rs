/// Database row types. These map directly to SQLite rows and are
/// assembled into `ballot_types::models::Poll` by the query layer.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct PollRow {
    pub id: String,
    pub question: String,
    pub created_by: String,
    pub created_at: String,
}

pub struct OptionRow {
    pub id: String,
    pub text: String,
    pub votes: i64,
}
