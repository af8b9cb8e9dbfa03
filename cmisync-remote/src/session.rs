//! Session parameters for the AtomPub binding

/// Parameters for establishing a repository session.
///
/// `binding_type` stays `"atompub"` for every server this engine targets;
/// the field exists because the protocol allows other bindings.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub binding_type: String,
    pub atom_pub_url: String,
    pub user: String,
    pub password: String,
    pub repository_id: String,
}

impl SessionParams {
    pub fn new(
        atom_pub_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        repository_id: impl Into<String>,
    ) -> Self {
        Self {
            binding_type: "atompub".to_string(),
            atom_pub_url: atom_pub_url.into(),
            user: user.into(),
            password: password.into(),
            repository_id: repository_id.into(),
        }
    }
}
