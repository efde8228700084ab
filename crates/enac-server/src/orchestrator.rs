//! # Server Orchestrator
//!
//! Runs one [`DualStackListener`] per bind target, concurrently. A failing
//! listener is logged and reported; it never cancels the others.

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::ListenerError;
use crate::listener::{DualStackListener, ListenerContext, ListenerState};

/// How one listener ended.
#[derive(Debug)]
pub struct ListenerOutcome {
    pub target: String,
    pub result: Result<(), ListenerError>,
}

pub struct Orchestrator {
    listeners: Vec<DualStackListener>,
}

impl Orchestrator {
    pub fn new<I, S>(targets: I, ctx: &ListenerContext) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let listeners = targets
            .into_iter()
            .map(|target| DualStackListener::new(target, ctx.clone()))
            .collect();
        Orchestrator { listeners }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// State receivers, in target order.
    pub fn states(&self) -> Vec<(String, watch::Receiver<ListenerState>)> {
        self.listeners
            .iter()
            .map(|l| (l.target().to_string(), l.subscribe()))
            .collect()
    }

    /// Run every listener to completion. Outcomes are in completion order.
    pub async fn run(self) -> Vec<ListenerOutcome> {
        let mut tasks = JoinSet::new();
        for listener in self.listeners {
            info!(target_addr = listener.target(), "starting listener");
            tasks.spawn(async move {
                let target = listener.target().to_string();
                let result = listener.run().await;
                ListenerOutcome { target, result }
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(()) => info!(target_addr = %outcome.target, "listener closed"),
                        Err(e) => error!(target_addr = %outcome.target, error = %e, "listener failed"),
                    }
                    outcomes.push(outcome);
                }
                Err(e) => error!(error = %e, "listener task failed"),
            }
        }
        outcomes
    }
}
