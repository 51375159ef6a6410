use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime, Timeouts};
use tokio_postgres::NoTls;

use crate::args::PostgresArgs;

/// How long a task may wait for a pooled connection before the caller is
/// told to back off. Matches the database deadline in the design.
pub const DB_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn create_pool(args: &PostgresArgs) -> Result<Pool> {
    let pg_cfg =
        tokio_postgres::Config::from_str(&args.database_url).context("invalid DATABASE_URL")?;
    let manager = Manager::from_config(
        pg_cfg,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(args.db_pool_size)
        .timeouts(Timeouts {
            wait: Some(DB_WAIT_TIMEOUT),
            create: Some(DB_WAIT_TIMEOUT),
            recycle: Some(DB_WAIT_TIMEOUT),
        })
        .runtime(Runtime::Tokio1)
        .build()
        .context("failed to create Postgres pool")
}
