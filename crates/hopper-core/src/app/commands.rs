//! The broker's command set.
//!
//! | Command    | Args                        | Success                 |
//! |------------|-----------------------------|-------------------------|
//! | AddJob     | tube, payload               | `1, msg, id`            |
//! | GetJob     | tube                        | `1, msg, id, payload`   |
//! | SetReturn  | id, payload                 | `1, msg`                |
//! | GetReturn  | id, [timeout secs]          | `1, msg, payload`       |
//! | Usr1       | tube, [timeout secs]        | `1, msg`                |
//! | Status     |                             | `1, running, counts`    |
//! | StopServer |                             | `1, msg`                |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::runtime::{CommandHandler, HandlerRegistry, RequestContext, Services};
use crate::domain::JobStatus;
use crate::error::{HopperError, Result, WaitError};
use crate::protocol::Reply;

pub const ADD_JOB: &str = "AddJob";
pub const GET_JOB: &str = "GetJob";
pub const SET_RETURN: &str = "SetReturn";
pub const GET_RETURN: &str = "GetReturn";
pub const USR1: &str = "Usr1";
pub const STATUS: &str = "Status";
pub const STOP_SERVER: &str = "StopServer";

/// Every command a stock broker serves.
pub const ALL: [&str; 7] = [
    ADD_JOB, GET_JOB, SET_RETURN, GET_RETURN, USR1, STATUS, STOP_SERVER,
];

pub fn register_defaults(registry: &mut HandlerRegistry) -> Result<()> {
    registry.register(ADD_JOB, Arc::new(AddJob))?;
    registry.register(GET_JOB, Arc::new(GetJob))?;
    registry.register(SET_RETURN, Arc::new(SetReturn))?;
    registry.register(GET_RETURN, Arc::new(GetReturn))?;
    registry.register(USR1, Arc::new(Usr1))?;
    registry.register(STATUS, Arc::new(Status))?;
    registry.register(STOP_SERVER, Arc::new(StopServer))?;
    Ok(())
}

/// Argument validation failures become a `405` reply, never an error.
type ArgResult<T> = std::result::Result<T, Reply>;

fn require(args: &[Bytes], n: usize) -> ArgResult<()> {
    if args.len() < n {
        return Err(Reply::bad_arguments(format!(
            "expected at least {n} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn text_arg<'a>(args: &'a [Bytes], idx: usize, what: &str) -> ArgResult<&'a str> {
    std::str::from_utf8(&args[idx])
        .map_err(|_| Reply::bad_arguments(format!("{what} must be valid UTF-8")))
}

/// Optional whole-second timeout. Missing or empty means "use the default".
fn timeout_arg(args: &[Bytes], idx: usize) -> ArgResult<Option<Duration>> {
    let Some(raw) = args.get(idx).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Some(Duration::from_secs(secs)))
        .ok_or_else(|| Reply::bad_arguments("timeout must be a non-negative integer"))
}

/// Collapse the argument-check short circuit into a reply.
macro_rules! try_args {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(reply) => return Ok(Some(reply)),
        }
    };
}

/// Enqueue a job under a freshly generated id.
pub struct AddJob;

#[async_trait]
impl CommandHandler for AddJob {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>> {
        try_args!(require(args, 2));
        let tube = try_args!(text_arg(args, 0, "tube"));

        let id = services.ids.next_id();
        if !services.jobs.join(tube, &id, args[1].clone()).await {
            return Err(HopperError::Internal(format!("generated id {id} already in use")));
        }
        tracing::debug!(session = %ctx.session, tube, id = %id, "job added");
        Ok(Some(Reply::ok("job added").with_payload(id)))
    }
}

/// Reserve the next Ready job of a tube for this connection.
pub struct GetJob;

#[async_trait]
impl CommandHandler for GetJob {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>> {
        try_args!(require(args, 1));
        let tube = try_args!(text_arg(args, 0, "tube"));

        let reply = match services.jobs.reserve(tube, ctx.session).await {
            Some(job) => Reply::ok("job reserved")
                .with_payload(job.key)
                .with_payload(job.payload),
            None => Reply::empty("no job"),
        };
        Ok(Some(reply))
    }
}

/// Finish a reserved job and publish its result.
///
/// The job must be finished first; an unknown or non-reserved id leaves the
/// cache untouched.
pub struct SetReturn;

#[async_trait]
impl CommandHandler for SetReturn {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>> {
        try_args!(require(args, 2));
        let id = try_args!(text_arg(args, 0, "id"));

        if !services.jobs.finish(id, ctx.session).await {
            return Ok(Some(Reply::not_found("unknown job")));
        }
        services
            .cache
            .set(id, args[1].clone(), services.config.result_ttl())
            .await;
        Ok(Some(Reply::ok("result stored")))
    }
}

/// Fetch a job's result, blocking while the job is still pending.
pub struct GetReturn;

#[async_trait]
impl CommandHandler for GetReturn {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>> {
        try_args!(require(args, 1));
        let id = try_args!(text_arg(args, 0, "id"));
        let timeout = try_args!(timeout_arg(args, 1)).unwrap_or_else(|| services.config.get_return_timeout());

        // A Delayed job is finished, but SetReturn may not have written its
        // result yet, so it waits like a pending one.
        let known = services.jobs.exists(id).await
            || services.jobs.status_of(id).await == Some(JobStatus::Delayed);

        let value = if known {
            match services.cache.await_value(id, timeout, &ctx.cancel).await {
                Ok(value) => value,
                Err(WaitError::Timeout) => return Ok(Some(Reply::timeout())),
                Err(WaitError::Cancelled) => return Ok(None),
            }
        } else {
            services.cache.get(id).await
        };

        Ok(Some(match value {
            Some(value) => Reply::ok("result").with_payload(value),
            None => Reply::empty("no result"),
        }))
    }
}

/// Block until a tube has a deliverable job.
///
/// Without a timeout argument this waits until the connection closes.
pub struct Usr1;

#[async_trait]
impl CommandHandler for Usr1 {
    async fn handle(
        &self,
        services: &Services,
        ctx: &RequestContext,
        args: &[Bytes],
    ) -> Result<Option<Reply>> {
        try_args!(require(args, 1));
        let tube = try_args!(text_arg(args, 0, "tube"));
        let timeout = try_args!(timeout_arg(args, 1));

        let reply = match services.jobs.await_non_empty(tube, timeout, &ctx.cancel).await {
            Ok(true) => Reply::ok("tube has jobs"),
            Ok(false) => Reply::empty("tube drained"),
            Err(WaitError::Timeout) => Reply::timeout(),
            Err(WaitError::Cancelled) => return Ok(None),
        };
        Ok(Some(reply))
    }
}

pub struct Status;

#[async_trait]
impl CommandHandler for Status {
    async fn handle(
        &self,
        services: &Services,
        _ctx: &RequestContext,
        _args: &[Bytes],
    ) -> Result<Option<Reply>> {
        let counts = serde_json::to_vec(&services.counts().await)?;
        Ok(Some(Reply::ok("running").with_payload(counts)))
    }
}

/// Acknowledge, then stop the server. The reply is written before the
/// connection notices the shutdown.
pub struct StopServer;

#[async_trait]
impl CommandHandler for StopServer {
    async fn handle(
        &self,
        _services: &Services,
        ctx: &RequestContext,
        _args: &[Bytes],
    ) -> Result<Option<Reply>> {
        tracing::info!(session = %ctx.session, "stop requested");
        ctx.shutdown.cancel();
        Ok(Some(Reply::ok("stopping")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{BrokerBuilder, Runtime};
    use crate::config::BrokerConfig;
    use crate::domain::SessionId;
    use crate::observability::BrokerCounts;
    use crate::protocol::{Frame, StatusCode};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    fn runtime() -> Runtime {
        BrokerBuilder::new(BrokerConfig::default())
            .with_default_commands()
            .unwrap()
            .build()
            .unwrap()
    }

    fn ctx(session: u64) -> RequestContext {
        RequestContext {
            session: SessionId::new(session),
            cancel: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn req(parts: &[&[u8]]) -> Frame {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    async fn call(rt: &Runtime, ctx: &RequestContext, parts: &[&[u8]]) -> Reply {
        rt.dispatch(ctx, &req(parts)).await.unwrap()
    }

    #[tokio::test]
    async fn add_get_set_get_return() {
        let rt = runtime();
        let producer = ctx(1);
        let worker = ctx(2);

        let added = call(&rt, &producer, &[b"AddJob", b"emails", b"P"]).await;
        assert!(added.is_ok());
        let id = added.payload[0].clone();

        let got = call(&rt, &worker, &[b"GetJob", b"emails"]).await;
        assert!(got.is_ok());
        assert_eq!(got.payload, vec![id.clone(), Bytes::from_static(b"P")]);

        let set = call(&rt, &worker, &[b"SetReturn", &id, b"R"]).await;
        assert!(set.is_ok());

        let ret = call(&rt, &producer, &[b"GetReturn", &id]).await;
        assert!(ret.is_ok());
        assert_eq!(ret.payload, vec![Bytes::from_static(b"R")]);
    }

    #[tokio::test]
    async fn get_job_on_empty_tube_is_empty() {
        let rt = runtime();
        let reply = call(&rt, &ctx(1), &[b"GetJob", b"nothing"]).await;
        assert_eq!(reply.status, StatusCode::Empty);
    }

    #[tokio::test]
    async fn set_return_for_unknown_id_is_404_and_caches_nothing() {
        let rt = runtime();
        let reply = call(&rt, &ctx(1), &[b"SetReturn", b"u1", b"R"]).await;
        assert_eq!(reply.status, StatusCode::NotFound);
        assert_eq!(rt.services().cache.get("u1").await, None);
    }

    #[tokio::test]
    async fn set_return_on_ready_job_is_404() {
        let rt = runtime();
        let added = call(&rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;
        let id = added.payload[0].clone();

        let reply = call(&rt, &ctx(1), &[b"SetReturn", &id, b"R"]).await;
        assert_eq!(reply.status, StatusCode::NotFound);
    }

    #[rstest]
    #[case::add_job(&[&b"AddJob"[..], &b"t"[..]])]
    #[case::get_job(&[&b"GetJob"[..]])]
    #[case::set_return(&[&b"SetReturn"[..], &b"id"[..]])]
    #[case::get_return(&[&b"GetReturn"[..]])]
    #[case::usr1(&[&b"Usr1"[..]])]
    #[case::bad_timeout(&[&b"GetReturn"[..], &b"id"[..], &b"soon"[..]])]
    #[case::negative_timeout(&[&b"Usr1"[..], &b"t"[..], &b"-3"[..]])]
    #[case::tube_not_utf8(&[&b"GetJob"[..], &b"\xff\xfe"[..]])]
    #[tokio::test]
    async fn bad_arguments_are_405(#[case] parts: &[&[u8]]) {
        let rt = runtime();
        let reply = call(&rt, &ctx(1), parts).await;
        assert_eq!(reply.status, StatusCode::BadArguments);
    }

    #[tokio::test]
    async fn get_return_unknown_id_is_empty() {
        let rt = runtime();
        let reply = call(&rt, &ctx(1), &[b"GetReturn", b"never"]).await;
        assert_eq!(reply.status, StatusCode::Empty);
    }

    #[tokio::test]
    async fn get_return_times_out_while_pending() {
        let rt = runtime();
        let added = call(&rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;
        let id = added.payload[0].clone();

        let reply = call(&rt, &ctx(1), &[b"GetReturn", &id, b"0"]).await;
        assert_eq!(reply.status, StatusCode::Timeout);
    }

    #[tokio::test]
    async fn get_return_cancelled_has_no_reply() {
        let rt = runtime();
        let added = call(&rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;
        let id = added.payload[0].clone();

        let gone = ctx(2);
        gone.cancel.cancel();
        assert!(rt.dispatch(&gone, &req(&[b"GetReturn", &id])).await.is_none());
    }

    async fn finished_without_result(rt: &Runtime) -> String {
        let added = call(rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;
        let id = String::from_utf8(added.payload[0].to_vec()).unwrap();
        call(rt, &ctx(2), &[b"GetJob", b"t"]).await;
        assert!(rt.services().jobs.finish(&id, SessionId::new(2)).await);
        id
    }

    #[tokio::test]
    async fn get_return_between_finish_and_cache_write_waits() {
        let rt = runtime();
        let id = finished_without_result(&rt).await;

        let reply = call(&rt, &ctx(1), &[b"GetReturn", id.as_bytes(), b"0"]).await;
        assert_eq!(reply.status, StatusCode::Timeout);
    }

    #[tokio::test]
    async fn get_return_between_finish_and_cache_write_gets_late_result() {
        let rt = runtime();
        let id = finished_without_result(&rt).await;
        let producer = ctx(1);
        let args: [&[u8]; 3] = [b"GetReturn", id.as_bytes(), b"5"];

        let (reply, _) = tokio::join!(
            call(&rt, &producer, &args),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                rt.services()
                    .cache
                    .set(&id, Bytes::from_static(b"R"), Duration::from_secs(60))
                    .await
            }
        );
        assert!(reply.is_ok());
        assert_eq!(reply.payload, vec![Bytes::from_static(b"R")]);
    }

    #[tokio::test]
    async fn get_return_on_finished_job_returns_stored_result() {
        let rt = runtime();
        let id = finished_without_result(&rt).await;
        rt.services()
            .cache
            .set(&id, Bytes::from_static(b"R"), Duration::from_secs(60))
            .await;

        let reply = call(&rt, &ctx(1), &[b"GetReturn", id.as_bytes(), b"0"]).await;
        assert!(reply.is_ok());
        assert_eq!(reply.payload, vec![Bytes::from_static(b"R")]);
    }

    #[tokio::test]
    async fn usr1_reports_ready_tube() {
        let rt = runtime();
        call(&rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;
        let reply = call(&rt, &ctx(2), &[b"Usr1", b"t"]).await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn usr1_with_timeout_on_empty_tube_is_408() {
        let rt = runtime();
        let reply = call(&rt, &ctx(1), &[b"Usr1", b"t", b"0"]).await;
        assert_eq!(reply.status, StatusCode::Timeout);
    }

    #[tokio::test]
    async fn status_carries_counts() {
        let rt = runtime();
        call(&rt, &ctx(1), &[b"AddJob", b"t", b"P"]).await;

        let reply = call(&rt, &ctx(1), &[b"Status"]).await;
        assert!(reply.is_ok());
        assert_eq!(reply.message, "running");
        let counts: BrokerCounts = serde_json::from_slice(&reply.payload[0]).unwrap();
        assert_eq!(counts.queue.ready, 1);
        assert_eq!(counts.queue.tubes, 1);
    }

    #[tokio::test]
    async fn stop_server_replies_and_fires_shutdown() {
        let rt = runtime();
        let c = ctx(1);
        let reply = call(&rt, &c, &[b"StopServer"]).await;
        assert!(reply.is_ok());
        assert!(c.shutdown.is_cancelled());
    }
}
