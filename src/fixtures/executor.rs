//! Runs ordered fixtures against an entity manager

use crate::error::{HarnessError, Result};
use crate::orm::EntityManager;

use super::{NamedFixture, Purger, ReferenceRepository};

pub struct Executor<'a> {
    em: &'a mut EntityManager,
    purger: Option<Purger>,
}

impl<'a> Executor<'a> {
    pub fn new(em: &'a mut EntityManager, purger: Option<Purger>) -> Self {
        Self { em, purger }
    }

    /// Load `fixtures` in order inside a single transaction. Without
    /// `append` the mapped tables are purged first. A failing fixture rolls
    /// the whole load back.
    pub fn execute(
        &mut self,
        fixtures: &[NamedFixture],
        references: &mut ReferenceRepository,
        append: bool,
    ) -> Result<()> {
        let purger = if append { None } else { self.purger.as_ref() };

        self.em.transactional(|em| {
            if let Some(purger) = purger {
                purger.purge(em)?;
            }
            for named in fixtures {
                tracing::debug!(fixture = %named.name, "loading fixture");
                named
                    .fixture
                    .load(em, references)
                    .map_err(|source| match source.downcast::<HarnessError>() {
                        Ok(err) => err,
                        Err(source) => HarnessError::Fixture {
                            name: named.name.clone(),
                            source,
                        },
                    })?;
                em.flush()?;
            }
            Ok(())
        })?;

        tracing::debug!(count = fixtures.len(), append, "executed fixtures");
        Ok(())
    }
}
