use serde_json::Value;

use crate::error::{PollError, Result};
use crate::infra::multicall::{CallDescriptor, CallResult};

/// Identity of a request as seen by its handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    pub id: String,
    pub user_info: Option<Value>,
}

/// A logical unit of work in a poll cycle.
///
/// `calls()` must be idempotent: the aggregator may derive the batch more than
/// once. `handle` is consumed, so each handler runs exactly once.
pub trait PollRequest: Send {
    fn id(&self) -> &str;

    fn calls(&self) -> Vec<CallDescriptor>;

    fn call_count(&self) -> usize;

    fn user_info(&self) -> Option<&Value> {
        None
    }

    fn handle(self: Box<Self>, results: Result<&[CallResult]>);
}

/// Wraps exactly one call.
pub struct FnPollRequest<F> {
    meta: RequestMeta,
    call: CallDescriptor,
    handler: F,
}

impl<F> FnPollRequest<F>
where
    F: FnOnce(Result<&CallResult>, &RequestMeta) + Send,
{
    pub fn new(id: impl Into<String>, call: CallDescriptor, handler: F) -> Self {
        Self {
            meta: RequestMeta {
                id: id.into(),
                user_info: None,
            },
            call,
            handler,
        }
    }

    pub fn with_user_info(mut self, user_info: Value) -> Self {
        self.meta.user_info = Some(user_info);
        self
    }
}

impl<F> PollRequest for FnPollRequest<F>
where
    F: FnOnce(Result<&CallResult>, &RequestMeta) + Send,
{
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn calls(&self) -> Vec<CallDescriptor> {
        vec![self.call.clone()]
    }

    fn call_count(&self) -> usize {
        1
    }

    fn user_info(&self) -> Option<&Value> {
        self.meta.user_info.as_ref()
    }

    fn handle(self: Box<Self>, results: Result<&[CallResult]>) {
        let this = *self;
        let single = results.and_then(|results| match results {
            [only] => Ok(only),
            _ => Err(PollError::decode(format!(
                "{} expected 1 result, got {}",
                this.meta.id,
                results.len()
            ))),
        });
        (this.handler)(single, &this.meta);
    }
}

/// Wraps an arbitrary pre-built list of calls.
pub struct GroupPollRequest<F> {
    meta: RequestMeta,
    calls: Vec<CallDescriptor>,
    handler: F,
}

impl<F> GroupPollRequest<F>
where
    F: FnOnce(Result<&[CallResult]>, &RequestMeta) + Send,
{
    pub fn new(id: impl Into<String>, calls: Vec<CallDescriptor>, handler: F) -> Self {
        Self {
            meta: RequestMeta {
                id: id.into(),
                user_info: None,
            },
            calls,
            handler,
        }
    }

    pub fn with_user_info(mut self, user_info: Value) -> Self {
        self.meta.user_info = Some(user_info);
        self
    }
}

impl<F> PollRequest for GroupPollRequest<F>
where
    F: FnOnce(Result<&[CallResult]>, &RequestMeta) + Send,
{
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn calls(&self) -> Vec<CallDescriptor> {
        self.calls.clone()
    }

    fn call_count(&self) -> usize {
        self.calls.len()
    }

    fn user_info(&self) -> Option<&Value> {
        self.meta.user_info.as_ref()
    }

    fn handle(self: Box<Self>, results: Result<&[CallResult]>) {
        let this = *self;
        let results = results.and_then(|results| {
            if results.len() == this.calls.len() {
                Ok(results)
            } else {
                Err(PollError::decode(format!(
                    "{} expected {} results, got {}",
                    this.meta.id,
                    this.calls.len(),
                    results.len()
                )))
            }
        });
        (this.handler)(results, &this.meta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};
    use std::sync::{Arc, Mutex};

    fn call(byte: u8) -> CallDescriptor {
        CallDescriptor::new(Address::repeat_byte(byte), Bytes::from(vec![byte]))
    }

    fn result(index: usize) -> CallResult {
        CallResult {
            index,
            target: Address::ZERO,
            success: true,
            return_data: Bytes::new(),
        }
    }

    #[test]
    fn fn_request_counts_one_call() {
        let request = FnPollRequest::new("fee", call(1), |_: Result<&CallResult>, _: &RequestMeta| {});
        assert_eq!(request.call_count(), 1);
        assert_eq!(request.calls(), request.calls());
        assert_eq!(request.id(), "fee");
    }

    #[test]
    fn group_request_counts_calls() {
        let request = GroupPollRequest::new(
            "balances",
            vec![call(1), call(2), call(3)],
            |_: Result<&[CallResult]>, _: &RequestMeta| {},
        )
        .with_user_info(serde_json::json!({ "chain_id": 1 }));
        assert_eq!(request.call_count(), 3);
        assert_eq!(request.calls().len(), 3);
        assert_eq!(request.user_info(), Some(&serde_json::json!({ "chain_id": 1 })));
    }

    #[test]
    fn fn_request_rejects_wrong_result_count() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let request: Box<dyn PollRequest> = Box::new(FnPollRequest::new(
            "single",
            call(1),
            move |out: Result<&CallResult>, meta: &RequestMeta| {
                *sink.lock().unwrap() = Some((out.is_err(), meta.id.clone()));
            },
        ));
        request.handle(Ok(&[result(0), result(1)]));
        assert_eq!(*seen.lock().unwrap(), Some((true, "single".to_string())));
    }

    #[test]
    fn group_request_passes_errors_through() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let request: Box<dyn PollRequest> = Box::new(GroupPollRequest::new(
            "group",
            vec![call(1)],
            move |out: Result<&[CallResult]>, _: &RequestMeta| {
                *sink.lock().unwrap() = Some(out.map(|r| r.len()));
            },
        ));
        request.handle(Err(PollError::transport("timeout")));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(Err(PollError::transport("timeout")))
        );
    }
}
