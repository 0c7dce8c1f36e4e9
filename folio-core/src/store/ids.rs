//! Id range allocation
//!
//! Ids come from the `Identifiers` table: one row per dimension holding the
//! next unissued value. A reservation moves the cursor forward by a whole
//! block with a compare-and-set UPDATE, so contention costs a retry rather
//! than a lock wait, and every backend renders it the same way. Sessions
//! cache a block per dimension and hand out ids without further round
//! trips.

use crate::backend::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::Naming;
use crate::types::Value;

/// Dimension used for document ids. Reduce indexes use their index name.
pub const DOCUMENT_DIMENSION: &str = "Document";

const MAX_RESERVE_ATTEMPTS: usize = 16;

/// A contiguous reserved id range, `[next, end)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdBlock {
    next: i64,
    end: i64,
}

impl IdBlock {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Take the next id, if the block still has one.
    pub fn take(&mut self) -> Option<i64> {
        if self.next < self.end {
            let id = self.next;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }

    pub fn remaining(&self) -> i64 {
        self.end - self.next
    }
}

/// Reserves id blocks from the `Identifiers` table.
#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    block_size: i64,
}

impl IdAllocator {
    pub fn new(block_size: i64) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Reserve a fresh block for the dimension on the given connection.
    pub async fn reserve(
        &self,
        conn: &mut dyn Connection,
        dialect: &dyn Dialect,
        naming: &Naming,
        dimension: &str,
    ) -> Result<IdBlock> {
        let table = dialect.table(naming.schema(), &naming.identifiers_table());
        let q_dim = dialect.quote("Dimension");
        let q_next = dialect.quote("NextValue");

        let select = format!(
            "SELECT {q_next} FROM {table} WHERE {q_dim} = {}",
            dialect.placeholder(1)
        );
        let insert = format!(
            "INSERT INTO {table} ({q_dim}, {q_next}) VALUES ({}, {})",
            dialect.placeholder(1),
            dialect.placeholder(2)
        );
        let update = format!(
            "UPDATE {table} SET {q_next} = {} WHERE {q_dim} = {} AND {q_next} = {}",
            dialect.placeholder(1),
            dialect.placeholder(2),
            dialect.placeholder(3)
        );

        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let rows = conn
                .query(&select, &[Value::Text(dimension.to_string())])
                .await?;
            match rows.first() {
                None => {
                    // Fresh dimension: claim [1, 1 + block). Losing the
                    // insert race just means another writer seeded the row;
                    // re-read and CAS.
                    let claimed = conn
                        .execute(
                            &insert,
                            &[
                                Value::Text(dimension.to_string()),
                                Value::Int(1 + self.block_size),
                            ],
                        )
                        .await;
                    match claimed {
                        Ok(_) => {
                            tracing::debug!(dimension, from = 1, size = self.block_size, "Reserved id block");
                            return Ok(IdBlock {
                                next: 1,
                                end: 1 + self.block_size,
                            });
                        }
                        Err(_) => continue,
                    }
                }
                Some(row) => {
                    let current = row.i64("NextValue")?;
                    let updated = conn
                        .execute(
                            &update,
                            &[
                                Value::Int(current + self.block_size),
                                Value::Text(dimension.to_string()),
                                Value::Int(current),
                            ],
                        )
                        .await?;
                    if updated == 1 {
                        tracing::debug!(dimension, from = current, size = self.block_size, "Reserved id block");
                        return Ok(IdBlock {
                            next: current,
                            end: current + self.block_size,
                        });
                    }
                }
            }
        }

        Err(Error::Database(format!(
            "could not reserve an id block for dimension {dimension} after {MAX_RESERVE_ATTEMPTS} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ConnectionFactory, SqliteFactory};
    use crate::dialect::SqliteDialect;

    async fn setup() -> (SqliteFactory, Naming) {
        let factory = SqliteFactory::open_in_memory().unwrap();
        let mut conn = factory.connect().await.unwrap();
        conn.execute_script(
            "CREATE TABLE \"Identifiers\" (\"Dimension\" TEXT NOT NULL, \"NextValue\" INTEGER NOT NULL, PRIMARY KEY (\"Dimension\"))",
        )
        .await
        .unwrap();
        (factory, Naming::new("", None))
    }

    #[tokio::test]
    async fn blocks_are_contiguous_and_disjoint() {
        let (factory, naming) = setup().await;
        let mut conn = factory.connect().await.unwrap();
        let alloc = IdAllocator::new(4);

        let mut a = alloc
            .reserve(conn.as_mut(), &SqliteDialect, &naming, DOCUMENT_DIMENSION)
            .await
            .unwrap();
        let mut b = alloc
            .reserve(conn.as_mut(), &SqliteDialect, &naming, DOCUMENT_DIMENSION)
            .await
            .unwrap();

        let ids: Vec<i64> = (0..4).filter_map(|_| a.take()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(a.take().is_none());
        assert_eq!(b.take(), Some(5));
    }

    #[tokio::test]
    async fn dimensions_are_independent() {
        let (factory, naming) = setup().await;
        let mut conn = factory.connect().await.unwrap();
        let alloc = IdAllocator::new(8);

        let mut docs = alloc
            .reserve(conn.as_mut(), &SqliteDialect, &naming, DOCUMENT_DIMENSION)
            .await
            .unwrap();
        let mut reduced = alloc
            .reserve(conn.as_mut(), &SqliteDialect, &naming, "CountByTag")
            .await
            .unwrap();

        assert_eq!(docs.take(), Some(1));
        assert_eq!(reduced.take(), Some(1));
    }

    #[test]
    fn empty_block_yields_nothing() {
        let mut block = IdBlock::empty();
        assert!(block.take().is_none());
        assert_eq!(block.remaining(), 0);
    }
}
