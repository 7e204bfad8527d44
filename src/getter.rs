use async_trait::async_trait;

use crate::ejscreen::{AreaQuery, EjscreenReport, FetchError};

/// Gets EJScreen reports for census geographies.
///
/// The batch and single-area steps only talk to this trait, so they run
/// against the live broker or an in-memory source alike.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Gets the report for one area.
    async fn report(&self, query: &AreaQuery) -> Result<EjscreenReport, FetchError>;

    /// Gets the report for a census block group.
    async fn block_group(&self, area_id: &str) -> Result<EjscreenReport, FetchError> {
        self.report(&AreaQuery::block_group(area_id)).await
    }

    /// Gets the report for a city, addressed by name and place id.
    async fn city(&self, name: &str, area_id: &str) -> Result<EjscreenReport, FetchError> {
        self.report(&AreaQuery::city(name, area_id)).await
    }
}
