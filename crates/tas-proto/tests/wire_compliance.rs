//! Integration tests against captured lobby server traffic.
//!
//! These tests verify that:
//! 1. Real server lines decode into the expected words and sentences
//! 2. Encoding reproduces the captured text byte for byte
//! 3. Status integers from live sessions decode under both layouts

use tas_proto::{
    hash_password, marshall, unmarshall, BattleStatus, ClientStatus, Color, Command, StatusMode,
};

#[test]
fn test_tasserver_greeting() {
    let cmd = unmarshall("TASSERVER 0.38-33-g77f5e92 * 8201 0").expect("Should parse greeting");
    assert_eq!(cmd.name(), "TASSERVER");
    assert_eq!(cmd.arg(0), Some("0.38-33-g77f5e92"));
    assert_eq!(cmd.arg(1), Some("*"));
    assert_eq!(cmd.arg(2), Some("8201"));
    assert_eq!(cmd.arg(3), Some("0"));
}

#[test]
fn test_login_line_shape() {
    let cmd = Command::new("LOGIN")
        .word("GlassBead")
        .word(hash_password("hunter2"))
        .word("0")
        .word("*")
        .sentence("TASLink v0.4")
        .sentence("0")
        .sentence("a b sp cl");
    let line = marshall(&cmd).expect("Should encode LOGIN");
    assert_eq!(
        line,
        "LOGIN GlassBead KrljkMfb40Od500MmwsXZw== 0 * TASLink v0.4\t0\ta b sp cl"
    );
}

#[test]
fn test_said_free_text_rejoins() {
    let cmd = unmarshall("SAID main GlassBead !vote map  Comet Catcher").expect("Should parse");
    assert_eq!(cmd.arg(0), Some("main"));
    assert_eq!(cmd.arg(1), Some("GlassBead"));
    // The doubled space after "map" survives through rest().
    assert_eq!(cmd.rest(2).as_deref(), Some("!vote map  Comet Catcher"));
}

#[test]
fn test_battleopened_round_trip() {
    let raw = "BATTLEOPENED 36 0 0 Fleet 192.0.2.10 8452 16 1 0 -1336193159 spring\t105.1.1-841-g099e9d0\tComet Catcher Redux\tFleet's Teams\tBalanced Annihilation";
    let cmd = unmarshall(raw).expect("Should parse BATTLEOPENED");
    assert_eq!(cmd.arg(0), Some("36"));
    assert_eq!(cmd.arg(3), Some("Fleet"));
    assert_eq!(cmd.arg(10), Some("spring"));
    assert_eq!(cmd.tail(0), Some("105.1.1-841-g099e9d0"));
    assert_eq!(cmd.tail(1), Some("Comet Catcher Redux"));
    assert_eq!(cmd.tail(3), Some("Balanced Annihilation"));
    assert_eq!(marshall(&cmd).expect("Should re-encode"), raw);
}

#[test]
fn test_msgid_prefix_round_trip() {
    let cmd = unmarshall("#23 OK cmd=STARTTLS").expect("Should parse prefixed OK");
    assert_eq!(cmd.prefix, Some(23));
    assert_eq!(cmd.name(), "OK");
    assert_eq!(cmd.full_name(), "#23 OK");
    assert_eq!(marshall(&cmd).expect("Should re-encode"), "#23 OK cmd=STARTTLS");
}

#[test]
fn test_client_status_from_live_session() {
    // 22 = away + rank 5: bits 1 and 2-4.
    let status = ClientStatus::unmarshall(22);
    assert!(!status.in_game);
    assert!(status.away);
    assert_eq!(status.rank, 5);
    assert!(!status.moderator);
    assert!(!status.bot);

    // 66 = bot with bit 1 set (away flag on an autohost account).
    let bot = ClientStatus::unmarshall(66);
    assert!(bot.bot);
    assert!(bot.away);
}

#[test]
fn test_battle_status_layouts_agree_on_low_nibbles() {
    let value: i32 = 4_195_534; // ready player, id 3, team 3, synced
    let narrow = BattleStatus::unmarshall(value, StatusMode::Narrow);
    let extended = BattleStatus::unmarshall(value, StatusMode::Extended);
    assert_eq!(narrow.id, extended.id);
    assert_eq!(narrow.team, extended.team);
    assert_eq!(narrow.sync, extended.sync);
    assert!(narrow.ready && narrow.mode);
}

#[test]
fn test_color_matches_lobby_palette() {
    // 255 = pure red in 0x00BBGGRR packing.
    assert_eq!(
        Color::unmarshall(255),
        Color {
            red: 255,
            green: 0,
            blue: 0
        }
    );
    // 16711680 = 0x00FF0000 = pure blue.
    assert_eq!(
        Color::unmarshall(16_711_680),
        Color {
            red: 0,
            green: 0,
            blue: 255
        }
    );
}
