use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use edubattle::database::PgStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Password given to every seeded account.
    #[arg(long, default_value = "Password123")]
    password: String,

    #[arg(long, default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/data/seed.json"))]
    data: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data = seed::SeedData::load(&args.data)?;

    let store = PgStore::connect(&args.database_url, 1).await?;
    store.migrate().await?;

    let summary = seed::seed(&store, data, &args.password).await?;

    println!("\nSeeding complete");
    println!("Users: {}", summary.users);
    println!("Professor Cards: {}", summary.professors);
    println!("Achievements: {}", summary.achievements);
    println!("Questions: {}", summary.questions);
    println!("Modules: {}", summary.modules);
    println!("Awards: {}", summary.awards);

    Ok(())
}
