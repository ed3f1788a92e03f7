//! Network topology reconstruction from traceroute-style subnet measurements.
//!
//! Measured subnets are deduplicated in a [`SubnetSiteSet`](state::SubnetSiteSet),
//! arranged by route into a [`NetworkTree`](tree::NetworkTree), enriched with
//! alias-resolution hints by an [`AliasHintCollector`](alias::AliasHintCollector),
//! and finally exported as routers and subnets.

pub mod alias;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod state;
pub mod tree;

pub use error::{Error, Result};
