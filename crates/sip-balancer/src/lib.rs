// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stateless SIP load balancer in front of a cluster of application-server
//! nodes.
//!
//! Calls are spread over the registered nodes by a pluggable
//! [`BalancerAlgorithm`] and pinned by Call-ID, so every later request of a
//! call reaches the same node. The [`BalancerGateway`] rewrites each message
//! (Max-Forwards, Record-Route, Route, Via) and hands it to a
//! [`LegDispatcher`] for the external or internal leg.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use sip_balancer::{BalancerConfig, BalancerContext, NodeRegistry, Node, build_algorithm};
//! # use sip_transport::TransportKind;
//!
//! let registry = Arc::new(NodeRegistry::new());
//! registry.add_node(Node::new("as1", "10.0.0.1", 5060, vec![TransportKind::Udp]));
//!
//! let config = BalancerConfig::default();
//! let ctx = BalancerContext::from_config(&config).unwrap();
//! let algorithm = build_algorithm(&config.algorithm, registry.clone());
//! assert_eq!(algorithm.name(), "round_robin");
//! assert!(!ctx.is_dual_leg());
//! ```

pub mod activity;
pub mod algorithm;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod node;
pub mod registry;
pub mod response;
pub mod rewrite;

pub use activity::{CallActivity, CallPhase, CallTimeouts};
pub use algorithm::{build_algorithm, BalancerAlgorithm, CallIdHash, HeaderAffinity, RoundRobin};
pub use config::{AlgorithmConfig, BalancerConfig, LegConfig, NodeConfig};
pub use context::{BalancerContext, BalancerStats, Leg, LegEndpoint};
pub use error::{BalancerError, Result};
pub use gateway::{BalancerGateway, LegDispatcher};
pub use node::{Node, NodeEvent, NodeId};
pub use registry::NodeRegistry;
pub use response::{create_response, ReplyTemplate};
