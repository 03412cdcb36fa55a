// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entry point for messages arriving on either leg.
//!
//! ```text
//! request ─► Max-Forwards ─► Record-Route ─► strip own Routes
//!                                                 │
//!                              node hint ─► assign_to_node
//!                                                 │
//!            external origin ─► select / recall node
//!            internal origin ─► pin to the node in the top Via
//!                                                 │
//!                                    Via ─► Route to node (external)
//!                                                 │
//!                                     LegDispatcher::send_request
//! ```
//!
//! Failures before transmission are answered locally (483 or 500, nothing
//! for ACK). Transmission failures are logged and dropped; the peer's
//! retransmissions recover them.
//!
//! Pins are released by [`BalancerGateway::on_timeout`] and
//! [`BalancerGateway::on_transaction_terminated`] when a transaction layer
//! reports them. The daemon runs without one, so the gateway also releases
//! pins from the traffic it sees: a final response to a BYE, a failed final
//! response to a call's dialog-creating request (401 and 407 keep the pin for
//! the authenticated retry), and [`BalancerGateway::expire_idle_calls`] for
//! calls that went quiet.

use std::sync::Arc;

use async_trait::async_trait;
use sip_core::{Method, Request, Response, ViaHeader};
use sip_observe::BalancerObserver;
use tracing::{debug, error, info, warn};

use crate::activity::{CallActivity, CallPhase, CallTimeouts};
use crate::algorithm::{build_algorithm, BalancerAlgorithm};
use crate::config::BalancerConfig;
use crate::context::{BalancerContext, BalancerStats, Leg};
use crate::error::{BalancerError, Result};
use crate::registry::NodeRegistry;
use crate::response::ReplyTemplate;
use crate::rewrite::{
    add_record_routes, add_via, derive_branch, enforce_max_forwards, pop_own_via,
    push_node_route, strip_own_routes, via_address,
};

/// Hands rewritten messages to the transport for a given leg.
#[async_trait]
pub trait LegDispatcher: Send + Sync {
    async fn send_request(&self, leg: Leg, request: Request) -> anyhow::Result<()>;
    async fn send_response(&self, leg: Leg, response: Response) -> anyhow::Result<()>;
}

/// A request ready to leave the balancer.
struct Forward {
    origin: Leg,
    outbound: Leg,
    request: Request,
}

pub struct BalancerGateway {
    ctx: Arc<BalancerContext>,
    registry: Arc<NodeRegistry>,
    algorithm: Arc<dyn BalancerAlgorithm>,
    dispatcher: Arc<dyn LegDispatcher>,
    observer: Option<Arc<dyn BalancerObserver>>,
    activity: CallActivity,
    timeouts: CallTimeouts,
}

impl BalancerGateway {
    pub fn new(
        ctx: Arc<BalancerContext>,
        algorithm: Arc<dyn BalancerAlgorithm>,
        dispatcher: Arc<dyn LegDispatcher>,
    ) -> Self {
        Self {
            ctx,
            registry: algorithm.registry().clone(),
            algorithm,
            dispatcher,
            observer: None,
            activity: CallActivity::new(),
            timeouts: CallTimeouts::default(),
        }
    }

    /// Builds the context and the configured algorithm over `registry`.
    ///
    /// Nodes listed in the configuration are added to `registry`.
    pub fn from_config(
        config: &BalancerConfig,
        registry: Arc<NodeRegistry>,
        dispatcher: Arc<dyn LegDispatcher>,
    ) -> Result<Self> {
        let ctx = Arc::new(BalancerContext::from_config(config)?);
        for node in &config.nodes {
            registry.add_node(node.to_node());
        }
        let algorithm = build_algorithm(&config.algorithm, registry);
        info!(
            algorithm = algorithm.name(),
            dual_leg = ctx.is_dual_leg(),
            nodes = algorithm.registry().len(),
            "balancer gateway ready"
        );
        Ok(Self::new(ctx, algorithm, dispatcher).with_call_timeouts(config.call_timeouts()))
    }

    pub fn with_observer(mut self, observer: Arc<dyn BalancerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_call_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn context(&self) -> &Arc<BalancerContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn algorithm(&self) -> &Arc<dyn BalancerAlgorithm> {
        &self.algorithm
    }

    /// Pinned calls currently tracked for idle expiry.
    pub fn active_calls(&self) -> usize {
        self.activity.len()
    }

    pub fn stats(&self) -> BalancerStats {
        self.ctx.stats(&self.registry)
    }

    /// True when a Via names a registered node or an extra server.
    fn is_cluster_member(&self, via: &ViaHeader) -> bool {
        let (host, port) = via_address(via);
        self.registry.find_by_address(host, port).is_some() || self.ctx.is_extra_server(host, port)
    }

    /// Leg a request originated on.
    ///
    /// With two legs this is the leg it arrived on. With one, a top Via
    /// naming a cluster member means the request comes from inside.
    pub fn origin_of(&self, arrival: Leg, request: &Request) -> Leg {
        if self.ctx.is_dual_leg() {
            return arrival;
        }
        match request.top_via() {
            Some(via) if self.is_cluster_member(&via) => Leg::Internal,
            _ => Leg::External,
        }
    }

    fn outbound_leg(&self, origin: Leg) -> Leg {
        if self.ctx.is_dual_leg() {
            origin.opposite()
        } else {
            Leg::External
        }
    }

    /// Rewrites and forwards a request that arrived on `arrival`.
    pub async fn handle_request(&self, arrival: Leg, request: Request) {
        self.ctx.count_request();
        let method = request.method().clone();
        let template = ReplyTemplate::capture(&request);

        match self.route_request(arrival, request) {
            Ok(forward) => self.transmit_request(&method, forward).await,
            Err(err) => self.reject(arrival, &method, &template, err).await,
        }
    }

    fn route_request(&self, arrival: Leg, mut request: Request) -> Result<Forward> {
        let origin = self.origin_of(arrival, &request);

        if *request.method() != Method::Cancel {
            enforce_max_forwards(&mut request, self.ctx.max_forwards_ceiling())?;
        }

        if self.ctx.is_dialog_creating(request.method()) {
            add_record_routes(&mut request, &self.ctx, origin);
        }

        let stripped = strip_own_routes(&mut request, &self.ctx);
        if let Some(hint) = stripped.hint {
            match self.registry.find_node(&hint.host, hint.port, hint.transport) {
                Some(node) => {
                    let call_id = request
                        .call_id()
                        .ok_or(BalancerError::MissingHeader("Call-ID"))?;
                    self.algorithm.assign_to_node(call_id, node.clone());
                    self.notify(|o| o.on_node_assigned(self.algorithm.name(), &node.id().to_string()));
                }
                None => debug!(
                    node_host = %hint.host,
                    node_port = hint.port,
                    "route names an unknown node"
                ),
            }
        }

        let outbound = self.outbound_leg(origin);
        let branch = derive_branch(&request)?;

        // the algorithm reads the upstream top Via, so it runs before ours goes on
        let node = match origin {
            Leg::External => {
                let fresh = request
                    .call_id()
                    .is_some_and(|call_id| self.registry.get_assigned_node(call_id).is_none());
                let node = self.algorithm.process_external_request(&request)?;
                if fresh {
                    self.notify(|o| {
                        o.on_node_assigned(self.algorithm.name(), &node.id().to_string())
                    });
                }
                Some(node)
            }
            Leg::Internal => {
                self.algorithm.process_internal_request(&request);
                None
            }
        };

        add_via(&mut request, &self.ctx, outbound, &branch);
        if let Some(node) = &node {
            push_node_route(&mut request, node);
        }

        if let Some(call_id) = request.call_id() {
            if self.registry.get_assigned_node(call_id).is_some() {
                self.activity.record_request(call_id);
            }
        }

        Ok(Forward {
            origin,
            outbound,
            request,
        })
    }

    async fn transmit_request(&self, method: &Method, forward: Forward) {
        let Forward {
            origin,
            outbound,
            request,
        } = forward;
        debug!(%method, call_id = ?request.call_id(), %origin, %outbound, "forwarding request");
        match self.dispatcher.send_request(outbound, request).await {
            Ok(()) => self.notify(|o| {
                o.on_request_forwarded(method.as_str(), origin.as_str(), outbound.as_str())
            }),
            Err(e) => warn!(%method, leg = %outbound, error = %e, "failed to send request"),
        }
    }

    /// Answers a request the balancer could not forward. ACK gets no answer.
    async fn reject(&self, arrival: Leg, method: &Method, template: &ReplyTemplate, err: BalancerError) {
        if *method == Method::Ack {
            warn!(error = %err, "dropping ACK");
            return;
        }
        match &err {
            BalancerError::TooManyHops => info!(%method, "max-forwards exhausted"),
            BalancerError::NoNodeAvailable => warn!(%method, "no node available"),
            other => error!(%method, error = %other, "request processing failed"),
        }

        let (code, reason) = err.status();
        let response = match template.respond(code, reason) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "failed to build local response");
                return;
            }
        };
        match self.dispatcher.send_response(arrival, response).await {
            Ok(()) => self.notify(|o| o.on_local_response(code, method.as_str())),
            Err(e) => warn!(code, leg = %arrival, error = %e, "failed to send local response"),
        }
    }

    /// Strips the balancer's Via and forwards a response that arrived on `arrival`.
    pub async fn handle_response(&self, arrival: Leg, mut response: Response) {
        self.ctx.count_response();

        if !pop_own_via(response.headers_mut(), &self.ctx) {
            debug!(code = response.code(), "top Via does not name the balancer");
        }

        let from_cluster = if self.ctx.is_dual_leg() {
            arrival == Leg::Internal
        } else {
            // after the pop, a Via naming a cluster member means the request
            // went out from the cluster and this answer comes from outside
            !response
                .top_via()
                .is_some_and(|via| self.is_cluster_member(&via))
        };
        if from_cluster {
            self.algorithm.process_internal_response(&response);
        } else {
            self.algorithm.process_external_response(&response);
        }

        if let Some(call_id) = response.call_id() {
            self.track_response(call_id, &response);
        }

        let outbound = if self.ctx.is_dual_leg() {
            arrival.opposite()
        } else {
            Leg::External
        };
        let code = response.code();
        debug!(code, call_id = ?response.call_id(), %outbound, "forwarding response");
        match self.dispatcher.send_response(outbound, response).await {
            Ok(()) => self.notify(|o| o.on_response_forwarded(code, outbound.as_str())),
            Err(e) => warn!(code, leg = %outbound, error = %e, "failed to send response"),
        }
    }

    /// Releases or refreshes the pin of `call_id` from a passing response.
    fn track_response(&self, call_id: &str, response: &Response) {
        let code = response.code();
        let method = cseq_method(response);
        let success = (200..300).contains(&code);
        let dialog_creating = method
            .as_ref()
            .is_some_and(|method| self.ctx.is_dialog_creating(method));

        if response.start_line().is_final() {
            if method == Some(Method::Bye) {
                self.unstick(call_id);
                return;
            }
            let setup_failed = dialog_creating
                && !success
                && !matches!(code, 401 | 407)
                && self.activity.phase(call_id) != Some(CallPhase::Established);
            if setup_failed {
                debug!(call_id, code, "call setup failed");
                self.unstick(call_id);
                return;
            }
        }
        self.activity
            .record_response(call_id, dialog_creating && success);
    }

    /// Releases the pins of calls that stayed silent past their timeout.
    ///
    /// Returns the number of calls released.
    pub fn expire_idle_calls(&self) -> usize {
        let expired = self.activity.expire(&self.timeouts);
        for call_id in &expired {
            debug!(call_id = %call_id, "call went idle");
            self.unstick(call_id);
        }
        expired.len()
    }

    /// A transaction for `request` timed out: its call loses its pin.
    pub fn on_timeout(&self, request: &Request) {
        if let Some(call_id) = request.call_id() {
            debug!(call_id, method = %request.method(), "transaction timed out");
            self.unstick(call_id);
        }
    }

    /// A transaction completed. Completing a BYE releases the call's pin.
    pub fn on_transaction_terminated(&self, request: &Request) {
        if *request.method() != Method::Bye {
            return;
        }
        if let Some(call_id) = request.call_id() {
            self.unstick(call_id);
        }
    }

    fn unstick(&self, call_id: &str) {
        self.activity.forget(call_id);
        if self.registry.unstick_session(call_id) {
            self.notify(|o| o.on_unstick(call_id));
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn BalancerObserver)) {
        if let Some(observer) = &self.observer {
            f(observer.as_ref());
        }
    }
}

fn cseq_method(response: &Response) -> Option<Method> {
    let cseq = response.headers().get("CSeq")?;
    cseq.split_whitespace().nth(1).map(Method::from_token)
}
