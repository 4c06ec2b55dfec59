//! Fixtures shared by the unit tests.

use crate::db::{now, Database, User};

/// Insert a user with an unusable password hash and return its id.
pub fn seed_user(db: &Database, username: &str) -> String {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password_hash: "!".to_string(),
        created_at: now(),
    };
    db.transaction(|repo| repo.insert_user(&user)).expect("seed user");
    user.id
}
