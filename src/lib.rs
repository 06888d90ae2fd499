//! CBS Statline ETL.
//!
//! Downloads Dutch population (03759ned) and land-use (70262ned) statistics
//! from the Statline OData feeds, stages the large paginated fact feeds as
//! parquet files, and merges everything into Postgres with idempotent
//! keyed upserts. See `database_ops::statline` for the pipeline itself.

pub mod cli;
pub mod database_ops;

pub mod util {
    pub mod env;
}
