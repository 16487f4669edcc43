// Prints an argon2 PHC hash for seeding the first admin account, e.g.
// INSERT INTO app_user (..., password_hash, role) VALUES (..., '<hash>', 1);

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};

fn main() -> anyhow::Result<()> {
    let Some(password) = std::env::args().nth(1) else {
        eprintln!("Usage: hashpass <password>");
        std::process::exit(2);
    };
    if password.len() < 6 {
        anyhow::bail!("password must be at least 6 characters");
    }

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hashing failed: {e}"))?
        .to_string();
    println!("{phc}");
    Ok(())
}
