//! Command dispatch.
//!
//! A command is sent once.  Transport failures go straight back to the
//! caller: a repeated `LEVEL` restarts the motor, so nothing here retries.

use calyps_link::transport::{COMMAND_PATH, Transport};
use calyps_twin::TwinTracker;
use calyps_types::{CalypsError, ShutterCommand};
use tracing::{debug, info, instrument, warn};

/// Send `command` to the shutter `identity` and return the box's raw answer.
///
/// For `LEVEL`, the twin's target and motion are updated before the request
/// leaves, without waiting for the event socket to confirm.
///
/// # Errors
///
/// [`CalypsError::UnknownDevice`] for an identity no discovery has seen, or
/// [`CalypsError::Transport`] when the request fails.
#[instrument(skip(transport, tracker), fields(action = command.action()))]
pub async fn dispatch(
    transport: &dyn Transport,
    tracker: &TwinTracker,
    identity: &str,
    command: ShutterCommand,
) -> Result<String, CalypsError> {
    if !tracker.contains(identity) {
        return Err(CalypsError::UnknownDevice(identity.to_string()));
    }

    if let ShutterCommand::Level(level) = command {
        let predicted = tracker.predict_level(identity, level)?;
        debug!(device = %identity, %level, motion = %predicted, "predicted motion");
    }

    let args = command.args().map(|args| args.to_string());
    let mut form = vec![("action", command.action()), ("id", identity)];
    if let Some(args) = args.as_deref() {
        form.push(("args", args));
    }

    info!(device = %identity, action = command.action(), "sending command");
    transport.post(COMMAND_PATH, &form).await.map_err(|e| {
        warn!(device = %identity, error = %e, "command failed");
        CalypsError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedTransport, refused};
    use calyps_link::{EventKey, InventoryRecord};
    use calyps_types::{Level, MotionState};

    fn l(v: i64) -> Level {
        Level::new(v).unwrap()
    }

    fn tracker_at(level: i64) -> TwinTracker {
        let tracker = TwinTracker::default();
        tracker.apply_inventory(&[InventoryRecord {
            identity: "12".into(),
            event_key: EventKey::new("devices/shutter/12/"),
            display_name: "Kitchen".into(),
            manufacturer: None,
            level: l(level),
        }]);
        tracker
    }

    fn pairs(form: &[(&str, &str)]) -> Vec<(String, String)> {
        form.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn level_command_is_predicted_and_sent() {
        let transport = ScriptedTransport::always(Ok("ok".into()));
        let tracker = tracker_at(30);

        let body = dispatch(&transport, &tracker, "12", ShutterCommand::Level(l(80)))
            .await
            .unwrap();
        assert_eq!(body, "ok");

        let snap = tracker.snapshot("12").unwrap();
        assert_eq!(snap.motion, MotionState::Increasing);
        assert_eq!(snap.target_level, l(80));
        assert_eq!(snap.current_level, l(30));

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "/m?a=command");
        assert_eq!(
            calls[0].1,
            pairs(&[("action", "LEVEL"), ("id", "12"), ("args", r#"{"level":"80"}"#)])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_command_has_no_args_and_no_prediction() {
        let transport = ScriptedTransport::always(Ok(String::new()));
        let tracker = tracker_at(30);
        let mut rx = tracker.subscribe();

        dispatch(&transport, &tracker, "12", ShutterCommand::Stop)
            .await
            .unwrap();

        assert_eq!(transport.calls()[0].1, pairs(&[("action", "STOP"), ("id", "12")]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_returned_without_retry() {
        let transport = ScriptedTransport::always(Err(refused()));
        let tracker = tracker_at(30);

        let err = dispatch(&transport, &tracker, "12", ShutterCommand::Level(l(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, CalypsError::Transport(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_device_sends_nothing() {
        let transport = ScriptedTransport::always(Ok(String::new()));
        let tracker = tracker_at(30);

        let err = dispatch(&transport, &tracker, "99", ShutterCommand::Stop)
            .await
            .unwrap_err();
        assert_eq!(err, CalypsError::UnknownDevice("99".into()));
        assert_eq!(transport.call_count(), 0);
    }
}
