#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tether_core::{ChannelInfo, ChannelKind, Event, EventBus, TetherError, VoiceState};
    use tether_voice::mock::{MockBehavior, MockDirectory, MockTransport};
    use tether_voice::{ControllerSettings, VoiceController};
    use tokio::sync::broadcast;

    fn g(id: &str) -> String {
        id.to_string()
    }

    fn directory() -> MockDirectory {
        MockDirectory::new()
            .with_guild("g1", "Guild One")
            .with_voice_channel("g1", "v1", "Lounge")
            .with_voice_channel("g1", "v2", "Stage Left")
            .with_voice_channel("g2", "v9", "Elsewhere")
            .with_channel(ChannelInfo {
                id: g("t1"),
                guild_id: Some(g("g1")),
                name: "general".into(),
                kind: ChannelKind::Text,
                can_connect: true,
                can_speak: true,
            })
            .with_channel(ChannelInfo {
                id: g("locked"),
                guild_id: Some(g("g1")),
                name: "Locked".into(),
                kind: ChannelKind::Voice,
                can_connect: true,
                can_speak: false,
            })
    }

    struct Harness {
        controller: Arc<VoiceController>,
        transport: Arc<MockTransport>,
        directory: Arc<MockDirectory>,
        events: broadcast::Receiver<Event>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(MockTransport::default());
        let directory = Arc::new(directory());
        let bus = EventBus::default();
        let events = bus.subscribe();
        let controller = VoiceController::new(
            ControllerSettings::default(),
            transport.clone(),
            directory.clone(),
            bus,
        );
        Harness {
            controller,
            transport,
            directory,
            events,
        }
    }

    /// After a leave, nothing brings the agent back: not a forced disconnect, not time.
    async fn assert_stays_out(h: &Harness, opened: usize) {
        assert!(h.controller.target_channel(&g("g1")).is_none());
        assert_eq!(h.controller.connection_count(), 0);

        h.controller.on_forced_disconnect(&g("g1"));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(h.controller.target_channel(&g("g1")).is_none());
        assert!(!h.controller.has_pending_retry(&g("g1")));
        assert_eq!(h.controller.connection_count(), 0);
        assert_eq!(h.transport.open_count(), opened);
        assert_eq!(h.transport.live_sessions(), 0);
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Receive events until one matches, returning everything seen on the way.
    async fn events_until(
        rx: &mut broadcast::Receiver<Event>,
        mut done: impl FnMut(&Event) -> bool,
    ) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(3600), rx.recv())
                .await
                .expect("event did not arrive")
                .expect("bus closed");
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    }

    fn scheduled_delays(events: &[Event]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::RetryScheduled { delay_ms, .. } => Some(*delay_ms),
                _ => None,
            })
            .collect()
    }

    // ── Join ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_join_reaches_ready() {
        let mut h = harness();
        let info = h.controller.join(&g("g1"), &g("v1")).await.unwrap();

        assert_eq!(info.state, VoiceState::Ready);
        assert_eq!(info.channel_id, "v1");
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.controller.target_channel(&g("g1")), Some(g("v1")));
        assert_eq!(h.controller.connection_count(), 1);

        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionReady { .. })
        })
        .await;
        assert_eq!(
            events.last(),
            Some(&Event::ConnectionReady {
                guild_id: g("g1"),
                channel_id: g("v1")
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_passes_self_deaf_flags() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        let session = h.transport.last_session().unwrap();
        assert!(session.options.self_deaf);
        assert!(!session.options.self_mute);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_replaces_existing_connection() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.join(&g("g1"), &g("v2")).await.unwrap();

        let sessions = h.transport.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_destroyed());
        assert!(!sessions[1].is_destroyed());
        assert_eq!(h.controller.connection_count(), 1);
        assert_eq!(
            h.controller.connection_info(&g("g1")).unwrap().channel_id,
            "v2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_rejects_bad_channels() {
        let h = harness();

        let err = h.controller.join(&g("g1"), &g("t1")).await.unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));

        let err = h.controller.join(&g("g1"), &g("v9")).await.unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));

        let err = h.controller.join(&g("g1"), &g("missing")).await.unwrap_err();
        assert!(matches!(err, TetherError::Validation(_)));

        let err = h.controller.join(&g("g1"), &g("locked")).await.unwrap_err();
        assert!(matches!(err, TetherError::Permission(_)));

        assert_eq!(h.transport.open_count(), 0);
        assert_eq!(h.controller.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_times_out_and_ignores_late_ready() {
        let h = harness();
        h.transport.set_default(MockBehavior::Hang);

        let err = h.controller.join(&g("g1"), &g("v1")).await.unwrap_err();
        assert!(matches!(err, TetherError::Timeout { secs: 30, .. }));
        assert_eq!(h.controller.connection_count(), 0);

        let session = h.transport.last_session().unwrap();
        assert!(session.is_destroyed());
        session.emit(VoiceState::Ready);
        settle().await;
        assert!(h.controller.connection_info(&g("g1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_transport_failure() {
        let h = harness();
        h.transport.set_behavior("v1", MockBehavior::Fail);
        let err = h.controller.join(&g("g1"), &g("v1")).await.unwrap_err();
        assert!(matches!(err, TetherError::Transport(_)));
        assert!(h.controller.connection_info(&g("g1")).is_none());
    }

    // ── Leave ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_leave_without_connection_returns_false() {
        let h = harness();
        assert!(!h.controller.leave(&g("g1")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_tears_down_and_forgets_target() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();

        assert!(h.controller.leave(&g("g1")).await);
        assert!(h.controller.connection_info(&g("g1")).is_none());
        assert!(h.controller.target_channel(&g("g1")).is_none());
        assert!(h.transport.last_session().unwrap().is_destroyed());

        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionClosed { .. })
        })
        .await;
        assert!(!events.iter().any(|e| matches!(e, Event::RetryScheduled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_cancels_pending_retry() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);

        events_until(&mut h.events, |e| matches!(e, Event::RetryScheduled { .. })).await;
        assert!(h.controller.has_pending_retry(&g("g1")));

        assert!(!h.controller.leave(&g("g1")).await);
        assert!(!h.controller.has_pending_retry(&g("g1")));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.controller.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_during_channel_lookup_aborts_join() {
        let h = harness();
        h.directory.set_resolve_delay(Duration::from_secs(1));

        let join = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.join(&g("g1"), &g("v1")).await }
        });
        settle().await;

        assert!(!h.controller.leave(&g("g1")).await);
        let result = join.await.unwrap();
        assert!(matches!(result, Err(TetherError::JoinAborted { .. })));
        assert_stays_out(&h, 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_during_transport_open_discards_session() {
        let h = harness();
        h.transport.set_open_delay(Duration::from_secs(1));

        let join = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.join(&g("g1"), &g("v1")).await }
        });
        settle().await;

        assert!(!h.controller.leave(&g("g1")).await);
        let result = join.await.unwrap();
        assert!(matches!(result, Err(TetherError::JoinAborted { .. })));
        assert!(h.transport.last_session().unwrap().is_destroyed());
        assert_stays_out(&h, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_during_retry_open_stays_out() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.set_open_delay(Duration::from_secs(1));
        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);
        events_until(&mut h.events, |e| matches!(e, Event::RetryScheduled { .. })).await;

        // retry fires at 3s and is still inside open_session
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.transport.sessions().len(), 1);

        assert!(!h.controller.leave(&g("g1")).await);
        assert_eq!(h.transport.open_count(), 2);
        assert!(h.transport.last_session().unwrap().is_destroyed());
        assert_stays_out(&h, 2).await;
    }

    // ── Reconnection ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_drop_reconnects_after_base_delay() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        events_until(&mut h.events, |e| matches!(e, Event::ConnectionReady { .. })).await;

        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);
        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionReady { .. })
        })
        .await;

        assert!(events.contains(&Event::ConnectionLost {
            guild_id: g("g1"),
            channel_id: g("v1")
        }));
        assert_eq!(scheduled_delays(&events), vec![3000]);
        assert_eq!(h.transport.sessions().len(), 2);
        assert!(h.transport.sessions()[0].is_destroyed());
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.controller.reconnect_attempts(&g("g1")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_heal_within_window_skips_retry() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();

        let session = h.transport.last_session().unwrap();
        session.emit(VoiceState::Disconnected);
        session.emit(VoiceState::Signalling);
        session.emit(VoiceState::Ready);

        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionRecovered { .. })
        })
        .await;
        assert!(scheduled_delays(&events).is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_until_exhausted() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.set_default(MockBehavior::Fail);
        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);

        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::RetriesExhausted { .. })
        })
        .await;

        let expected: Vec<u64> = (0..10).map(|n| 3000 * 2u64.pow(n)).collect();
        assert_eq!(scheduled_delays(&events), expected);
        assert_eq!(
            events.last(),
            Some(&Event::RetriesExhausted {
                guild_id: g("g1"),
                channel_id: g("v1"),
                attempts: 10
            })
        );
        assert_eq!(h.controller.reconnect_attempts(&g("g1")), 10);
        assert!(!h.controller.has_pending_retry(&g("g1")));
        // first join plus ten retries
        assert_eq!(h.transport.open_count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_dropping_before_ready_schedules_once() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.set_behavior("v1", MockBehavior::Drop);
        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);

        let mut scheduled = 0;
        let mut events = events_until(&mut h.events, |e| {
            if matches!(e, Event::RetryScheduled { .. }) {
                scheduled += 1;
            }
            scheduled == 2
        })
        .await;
        settle().await;
        while let Ok(event) = h.events.try_recv() {
            events.push(event);
        }

        assert_eq!(scheduled_delays(&events), vec![3000, 6000]);
        assert_eq!(h.controller.reconnect_attempts(&g("g1")), 1);
        assert!(h.controller.has_pending_retry(&g("g1")));
        assert_eq!(h.controller.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_join_resets_counter_and_cancels_retry() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.set_behavior("v1", MockBehavior::Fail);
        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);

        // two failed retries, third one pending
        let mut scheduled = 0;
        events_until(&mut h.events, |e| {
            if matches!(e, Event::RetryScheduled { .. }) {
                scheduled += 1;
            }
            scheduled == 3
        })
        .await;
        assert_eq!(h.controller.reconnect_attempts(&g("g1")), 2);
        assert!(h.controller.has_pending_retry(&g("g1")));

        h.controller.join(&g("g1"), &g("v2")).await.unwrap();
        assert_eq!(h.controller.reconnect_attempts(&g("g1")), 0);
        assert!(!h.controller.has_pending_retry(&g("g1")));

        let opened = h.transport.open_count();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.transport.open_count(), opened);
        assert_eq!(
            h.controller.connection_info(&g("g1")).unwrap().channel_id,
            "v2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_follows_current_target() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.on_agent_moved(&g("g1"), &g("v2"));

        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);
        events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionReady { channel_id, .. } if channel_id == "v2")
        })
        .await;
        assert_eq!(h.transport.last_session().unwrap().channel_id, "v2");
    }

    // ── Platform notifications ─────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_agent_moved_updates_target() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.on_agent_moved(&g("g1"), &g("v2"));

        assert_eq!(h.controller.target_channel(&g("g1")), Some(g("v2")));
        assert_eq!(
            h.controller.connection_info(&g("g1")).unwrap().channel_id,
            "v2"
        );
        events_until(&mut h.events, |e| {
            *e == Event::TargetMoved {
                guild_id: g("g1"),
                channel_id: g("v2"),
            }
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_moved_without_target_is_ignored() {
        let h = harness();
        h.controller.on_agent_moved(&g("g1"), &g("v2"));
        assert!(h.controller.target_channel(&g("g1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_disconnect_schedules_one_retry() {
        let mut h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        events_until(&mut h.events, |e| matches!(e, Event::ConnectionReady { .. })).await;

        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);
        h.controller.on_forced_disconnect(&g("g1"));

        let events = events_until(&mut h.events, |e| {
            matches!(e, Event::ConnectionReady { .. })
        })
        .await;
        assert_eq!(scheduled_delays(&events), vec![3000]);
        assert_eq!(h.transport.open_count(), 2);
        assert!(h.controller.is_connected(&g("g1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_disconnect_after_self_heal_is_noop() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();

        let session = h.transport.last_session().unwrap();
        h.controller.on_forced_disconnect(&g("g1"));
        session.emit(VoiceState::Disconnected);
        session.emit(VoiceState::Signalling);
        session.emit(VoiceState::Ready);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.transport.open_count(), 1);
        assert!(!h.controller.has_pending_retry(&g("g1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_disconnect_without_target_stays_out() {
        let h = harness();
        h.controller.on_forced_disconnect(&g("g1"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.open_count(), 0);
        assert!(!h.controller.has_pending_retry(&g("g1")));
    }

    // ── Health and teardown ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_health_counts_add_up() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.join(&g("g2"), &g("v9")).await.unwrap();

        h.transport.last_session().unwrap().emit(VoiceState::Disconnected);
        settle().await;

        let report = h.controller.health_check();
        assert_eq!(report.total, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.unhealthy, 1);
        assert_eq!(report.healthy + report.unhealthy, report.total);

        let g1 = report.connections.iter().find(|c| c.guild_id == "g1").unwrap();
        assert_eq!(g1.guild_name, "Guild One");
        assert!(g1.healthy);
        let g2 = report.connections.iter().find(|c| c.guild_id == "g2").unwrap();
        assert_eq!(g2.guild_name, tether_voice::UNKNOWN_GUILD);
        assert_eq!(g2.status, VoiceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_connections_lists_uptime() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(90)).await;

        let all = h.controller.all_connections();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].guild_name, "Guild One");
        assert_eq!(all[0].channel_id, "v1");
        assert_eq!(all[0].status, VoiceState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_all_clears_everything() {
        let h = harness();
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.join(&g("g2"), &g("v9")).await.unwrap();

        h.controller.disconnect_all();
        assert_eq!(h.controller.connection_count(), 0);
        assert!(h.controller.target_channel(&g("g1")).is_none());
        assert!(h.controller.target_channel(&g("g2")).is_none());
        assert_eq!(h.transport.live_sessions(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.open_count(), 2);
    }
}
