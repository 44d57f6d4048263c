#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tether_config::TetherConfig;
    use tether_core::{EventBus, TetherError, VoiceState};
    use tether_discord::{DirectoryCache, IncomingMessage};
    use tether_runtime::commands::{self, Command, CommandContext, Reply};
    use tether_runtime::runtime::exhaustion_notice;
    use tether_runtime::{PresenceRuntime, apply_own_voice_state};
    use tether_voice::mock::{MockBehavior, MockTransport};
    use tether_voice::{ControllerSettings, VoiceController};

    fn g(id: &str) -> String {
        id.to_string()
    }

    fn message(author: &str, guild: Option<&str>, content: &str) -> IncomingMessage {
        IncomingMessage {
            id: g("m1"),
            channel_id: g("t1"),
            guild_id: guild.map(str::to_string),
            author_id: author.to_string(),
            author_name: author.to_string(),
            author_bot: false,
            content: content.to_string(),
        }
    }

    fn cache() -> Arc<DirectoryCache> {
        let cache = DirectoryCache::new();
        cache.set_bot_user("bot");
        cache.apply_guild(&json!({
            "id": "g1",
            "name": "Guild One",
            "channels": [
                { "id": "v1", "name": "Lounge", "type": 2 },
                { "id": "v2", "name": "Stage", "type": 2 },
                { "id": "t1", "name": "general", "type": 0 }
            ],
            "voice_states": [ { "user_id": "alice", "channel_id": "v1" } ]
        }));
        cache.apply_guild(&json!({
            "id": "g2",
            "name": "Guild Two",
            "channels": [ { "id": "v9", "name": "Elsewhere", "type": 2 } ]
        }));
        Arc::new(cache)
    }

    struct Harness {
        context: CommandContext,
        controller: Arc<VoiceController>,
        transport: Arc<MockTransport>,
    }

    fn harness(owner: Option<&str>) -> Harness {
        let cache = cache();
        let transport = Arc::new(MockTransport::default());
        let controller = VoiceController::new(
            ControllerSettings::default(),
            transport.clone(),
            cache.clone(),
            EventBus::default(),
        );
        let context = CommandContext {
            controller: controller.clone(),
            cache,
            owner_id: owner.map(str::to_string),
            prefix: "!".into(),
        };
        Harness {
            context,
            controller,
            transport,
        }
    }

    async fn run(h: &Harness, msg: &IncomingMessage) -> Reply {
        let command = commands::parse("!", msg).expect("not a command");
        h.context
            .execute(&command, msg)
            .await
            .expect("no reply for guild message")
    }

    fn embed_title(reply: &Reply) -> Option<String> {
        match reply {
            Reply::Embed(embed) => embed.title.clone(),
            Reply::Text(_) => None,
        }
    }

    // ── Parsing ────────────────────────────────────────────────

    #[test]
    fn test_parse_commands() {
        let parse = |content: &str| commands::parse("!", &message("alice", Some("g1"), content));
        assert_eq!(parse("!join"), Some(Command::Join));
        assert_eq!(parse("!JOIN"), Some(Command::Join));
        assert_eq!(parse("!joinid 123 extra"), Some(Command::JoinId(Some(g("123")))));
        assert_eq!(parse("!joinid"), Some(Command::JoinId(None)));
        assert_eq!(parse("!connections"), Some(Command::Connections));
        assert_eq!(parse("!dance"), None);
        assert_eq!(parse("join"), None);
        assert_eq!(parse("?join"), None);
    }

    #[test]
    fn test_parse_ignores_bots() {
        let mut msg = message("other-bot", Some("g1"), "!join");
        msg.author_bot = true;
        assert_eq!(commands::parse("!", &msg), None);
    }

    // ── Joining ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_join_follows_author_into_voice() {
        let h = harness(None);
        let reply = run(&h, &message("alice", Some("g1"), "!join")).await;
        assert_eq!(
            reply.text(),
            Some("✅ Successfully joined **Lounge**! I'll maintain presence here 24/7.")
        );
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.controller.target_channel(&g("g1")), Some(g("v1")));
        assert!(h.transport.last_session().unwrap().options.self_deaf);
    }

    #[tokio::test]
    async fn test_join_requires_author_in_voice() {
        let h = harness(None);
        let reply = run(&h, &message("bob", Some("g1"), "!join")).await;
        assert_eq!(reply.text(), Some("❌ You need to be in a voice channel first!"));
        assert_eq!(h.transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_joinid_validation() {
        let h = harness(None);
        let reply = run(&h, &message("alice", Some("g1"), "!joinid")).await;
        assert_eq!(
            reply.text(),
            Some("❌ Please provide a voice channel ID! Usage: `!joinid <channel_id>`")
        );

        let reply = run(&h, &message("alice", Some("g1"), "!joinid t1")).await;
        assert_eq!(reply.text(), Some("❌ Invalid voice channel ID!"));

        let reply = run(&h, &message("alice", Some("g1"), "!joinid nope")).await;
        assert_eq!(reply.text(), Some("❌ Invalid voice channel ID!"));

        let reply = run(&h, &message("alice", Some("g1"), "!joinid v9")).await;
        assert_eq!(reply.text(), Some("❌ Channel must be in this server!"));
        assert_eq!(h.transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_joinid_joins_named_channel() {
        let h = harness(None);
        let reply = run(&h, &message("bob", Some("g1"), "!joinid v2")).await;
        assert_eq!(
            reply.text(),
            Some("✅ Successfully joined **Stage**! I'll maintain presence here 24/7.")
        );
        assert_eq!(h.controller.connection_info(&g("g1")).unwrap().channel_id, "v2");
    }

    #[tokio::test]
    async fn test_join_failure_is_reported() {
        let h = harness(None);
        h.transport.set_default(MockBehavior::Fail);
        let reply = run(&h, &message("alice", Some("g1"), "!join")).await;
        let text = reply.text().unwrap();
        assert!(text.starts_with("❌ Failed to join voice channel:"), "{text}");
    }

    // ── Leave, status and listings ─────────────────────────────

    #[tokio::test]
    async fn test_leave() {
        let h = harness(None);
        let reply = run(&h, &message("alice", Some("g1"), "!leave")).await;
        assert_eq!(
            reply.text(),
            Some("❌ I'm not connected to any voice channel in this server!")
        );

        run(&h, &message("alice", Some("g1"), "!join")).await;
        let reply = run(&h, &message("alice", Some("g1"), "!leave")).await;
        assert_eq!(reply.text(), Some("✅ Left the voice channel successfully!"));
        assert!(!h.controller.is_connected(&g("g1")));
        assert_eq!(h.controller.target_channel(&g("g1")), None);
    }

    #[tokio::test]
    async fn test_status_embed() {
        let h = harness(None);
        let reply = run(&h, &message("alice", Some("g1"), "!status")).await;
        assert_eq!(
            reply.text(),
            Some("❌ Not connected to any voice channel in this server!")
        );

        run(&h, &message("alice", Some("g1"), "!join")).await;
        let Reply::Embed(embed) = run(&h, &message("alice", Some("g1"), "!status")).await else {
            panic!("expected an embed");
        };
        assert_eq!(embed.title.as_deref(), Some("🎵 Voice Connection Status"));
        assert_eq!(embed.fields[0].value, "Lounge");
        assert_eq!(embed.fields[1].value, VoiceState::Ready.as_str());
        assert_eq!(embed.color, Some(0x00ff00));
    }

    #[tokio::test]
    async fn test_health_embed_lists_connections() {
        let h = harness(None);
        run(&h, &message("alice", Some("g1"), "!join")).await;
        let Reply::Embed(embed) = run(&h, &message("alice", Some("g1"), "!health")).await else {
            panic!("expected an embed");
        };
        assert_eq!(embed.fields[0].value, "1");
        assert_eq!(embed.fields[1].value, "1");
        assert_eq!(embed.fields[2].value, "0");
        assert!(embed.fields[3].value.starts_with("✅ Guild One ("));
    }

    #[tokio::test]
    async fn test_connections_restricted_to_owner() {
        let h = harness(Some("owner"));
        let reply = run(&h, &message("alice", Some("g1"), "!connections")).await;
        assert_eq!(
            reply.text(),
            Some("❌ This command is restricted to the bot owner!")
        );

        let reply = run(&h, &message("owner", Some("g1"), "!connections")).await;
        assert_eq!(reply.text(), Some("❌ No active voice connections!"));

        run(&h, &message("alice", Some("g1"), "!join")).await;
        let reply = run(&h, &message("owner", Some("g1"), "!connections")).await;
        assert_eq!(
            embed_title(&reply).as_deref(),
            Some("🎵 Active Voice Connections (1)")
        );
    }

    #[tokio::test]
    async fn test_help_and_direct_messages() {
        let h = harness(None);
        let reply = run(&h, &message("alice", Some("g1"), "!help")).await;
        assert_eq!(
            embed_title(&reply).as_deref(),
            Some("🤖 Discord Voice Bot Commands")
        );

        let dm = message("alice", None, "!join");
        assert!(h.context.execute(&Command::Join, &dm).await.is_none());
    }

    // ── Own voice state ────────────────────────────────────────

    #[tokio::test]
    async fn test_moved_agent_updates_target() {
        let h = harness(None);
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();

        apply_own_voice_state(&h.controller, &g("g1"), Some(&g("v2")), Some(&g("v1")));
        assert_eq!(h.controller.target_channel(&g("g1")), Some(g("v2")));
        assert_eq!(h.controller.connection_info(&g("g1")).unwrap().channel_id, "v2");

        // repeated update for the same channel is not a move
        apply_own_voice_state(&h.controller, &g("g1"), Some(&g("v2")), Some(&g("v2")));
        assert_eq!(h.controller.target_channel(&g("g1")), Some(g("v2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_disconnect_schedules_reconnect() {
        let h = harness(None);
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.transport.last_session().unwrap().emit(VoiceState::Destroyed);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.controller.is_connected(&g("g1")));

        apply_own_voice_state(&h.controller, &g("g1"), None, Some(&g("v1")));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.controller.has_pending_retry(&g("g1")));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(h.controller.is_connected(&g("g1")));
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_disconnect_after_leave_stays_out() {
        let h = harness(None);
        h.controller.join(&g("g1"), &g("v1")).await.unwrap();
        h.controller.leave(&g("g1")).await;

        apply_own_voice_state(&h.controller, &g("g1"), None, Some(&g("v1")));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.has_pending_retry(&g("g1")));
        assert_eq!(h.transport.open_count(), 1);
    }

    // ── Runtime assembly ───────────────────────────────────────

    #[test]
    fn test_runtime_requires_token() {
        let err = PresenceRuntime::new(TetherConfig::default()).err().unwrap();
        assert!(matches!(err, TetherError::Config(_)));

        let mut config = TetherConfig::default();
        config.discord.token = Some("   ".into());
        assert!(PresenceRuntime::new(config).is_err());
    }

    #[tokio::test]
    async fn test_runtime_status_before_login() {
        let mut config = TetherConfig::default();
        config.discord.token = Some("token".into());
        let runtime = PresenceRuntime::new(config).unwrap();

        let status = runtime.status_source().status();
        assert!(!status.bot_ready);
        assert_eq!(status.guilds, 0);
        assert_eq!(status.voice_connections, 0);
        assert_eq!(runtime.controller().connection_count(), 0);
    }

    #[test]
    fn test_exhaustion_notice_mentions_channel() {
        let text = exhaustion_notice("!", &g("v1"), 10);
        assert!(text.contains("<#v1>"));
        assert!(text.contains("10 reconnection attempts"));
        assert!(text.contains("`!join`"));
    }
}
