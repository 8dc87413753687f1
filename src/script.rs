//! Start-script generation.
//!
//! Turns a frozen battle snapshot into the nested `[Section] { key=value; }`
//! document a game engine reads at startup, plus the maps from lobby player
//! and ally numbers to the synthetic script indices. Generation is a pure
//! function of the snapshot; it never touches live session state, so it can
//! run after the lobby connection (or the battle itself) is gone.

use std::collections::HashMap;

use tracing::warn;

use tas_proto::{BattleStatus, Color};

use crate::error::ScriptError;
use crate::state::{LobbyState, RunningBattle};

/// Caller-supplied data merged into the generated script.
///
/// Keys in `game` use full tag paths (`game/...`, case-insensitive) and
/// override snapshot script tags on collision, so they pass through the same
/// prefix filter as received tags. `player_data` is keyed by account id,
/// `ai_data` by bot name; both append raw key/value pairs to the matching
/// section. `sections` appends whole extra top-level sections verbatim.
#[derive(Debug, Clone, Default)]
pub struct StartScriptOverlay {
    /// Extra script tags, full `game/...` paths.
    pub game: Vec<(String, String)>,
    /// Extra per-player section entries, keyed by account id.
    pub player_data: HashMap<u32, Vec<(String, String)>>,
    /// Extra per-AI section entries, keyed by bot name.
    pub ai_data: HashMap<String, Vec<(String, String)>>,
    /// Extra top-level sections appended after everything else.
    pub sections: Vec<(String, Vec<(String, String)>)>,
}

/// A generated start script.
#[derive(Debug, Clone, Default)]
pub struct StartScript {
    /// The document, one element per line, tab-indented.
    pub lines: Vec<String>,
    /// Lobby player number (wide) to script team index.
    pub team_map: HashMap<u32, u32>,
    /// Lobby ally number (wide) to script ally-team index.
    pub ally_team_map: HashMap<u32, u32>,
}

/// One synthetic script team, created on first sight of a player number.
struct TeamEntry {
    leader: usize,
    color: Color,
    bonus: u32,
    ally: u32,
    side: Option<usize>,
}

/// First-sight numbering of script teams and ally teams, shared by players
/// and bots.
#[derive(Default)]
struct Synthesis {
    team_map: HashMap<u32, u32>,
    ally_team_map: HashMap<u32, u32>,
    ally_sources: Vec<u32>,
    teams: Vec<TeamEntry>,
}

impl Synthesis {
    fn claim_team(&mut self, status: BattleStatus, leader: usize, color: Color, sides: &[String]) -> u32 {
        let id = status.effective_id();
        if let Some(&index) = self.team_map.get(&id) {
            return index;
        }
        let index = self.teams.len() as u32;
        let ally = self.ally_index(status.effective_team());
        let side = clamp_side(status.side, sides, index);
        self.teams.push(TeamEntry {
            leader,
            color,
            bonus: status.bonus,
            ally,
            side,
        });
        self.team_map.insert(id, index);
        index
    }

    fn ally_index(&mut self, source: u32) -> u32 {
        if let Some(&index) = self.ally_team_map.get(&source) {
            return index;
        }
        let index = self.ally_sources.len() as u32;
        self.ally_team_map.insert(source, index);
        self.ally_sources.push(source);
        index
    }
}

/// Generates from live state: the stored in-game snapshot when one exists,
/// otherwise a snapshot of the currently joined battle.
pub(crate) fn for_state(
    state: &LobbyState,
    sides: &[String],
    autohost: bool,
    overlay: &StartScriptOverlay,
) -> Result<StartScript, ScriptError> {
    if let Some(running) = state.running_battle.as_ref() {
        return Ok(generate(running, sides, autohost, overlay));
    }
    match state.make_snapshot() {
        Some(snapshot) => Ok(generate(&snapshot, sides, autohost, overlay)),
        None => Err(ScriptError::NoBattle),
    }
}

/// Generates the start script for one battle snapshot.
///
/// `sides` is the faction list of the loaded game, in engine order;
/// out-of-range side indices clamp to the last entry. With `autohost` set
/// the local user is assumed to be the hosting process: it is dropped from
/// the player list when it leads it, and host keys replace the local-player
/// keys.
pub fn generate(
    running: &RunningBattle,
    sides: &[String],
    autohost: bool,
    overlay: &StartScriptOverlay,
) -> StartScript {
    let detail = &running.detail;

    // Overlay tags override received script tags under the same lowercase
    // key space, before any prefix filtering.
    let mut tags = detail.script_tags.clone();
    for (key, value) in &overlay.game {
        tags.insert(key.to_lowercase(), value.clone());
    }

    let mut members: Vec<&str> = running.battle.members.iter().map(String::as_str).collect();
    if autohost && members.first() == Some(&running.self_name.as_str()) {
        members.remove(0);
    }

    let status_of =
        |name: &str| -> Option<BattleStatus> { detail.members.get(name)?.battle_status };

    let mut players: Vec<&str> = Vec::new();
    let mut spectators: Vec<&str> = Vec::new();
    for name in members {
        match status_of(name) {
            Some(status) if status.mode => players.push(name),
            Some(_) => spectators.push(name),
            None => {
                warn!(user = name, "member without a battle status, treating as spectator");
                spectators.push(name);
            }
        }
    }

    players.sort_by_key(|name| status_of(name).map_or(0, |s| s.effective_id()));
    spectators.sort_by(|a, b| {
        let (skill_a, unc_a) = spectator_rating(&tags, a);
        let (skill_b, unc_b) = spectator_rating(&tags, b);
        skill_b
            .total_cmp(&skill_a)
            .then(unc_a.total_cmp(&unc_b))
    });

    let mut order = players.clone();
    order.extend(spectators.iter().copied());
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(index, name)| (*name, index))
        .collect();
    let my_position = position.get(running.self_name.as_str()).copied();

    let mut bots: Vec<&str> = detail
        .bot_names
        .iter()
        .map(String::as_str)
        .filter(|name| match detail.bots.get(*name) {
            Some(bot) if position.contains_key(bot.owner.as_str()) => true,
            Some(bot) => {
                warn!(bot = *name, owner = %bot.owner, "dropping AI whose owner is not in the player list");
                false
            }
            None => false,
        })
        .collect();
    bots.sort_by_key(|name| {
        detail
            .bots
            .get(*name)
            .map_or(0, |bot| bot.battle_status.effective_id())
    });

    // ============================================================
    // Team and ally-team synthesis, players then bots.
    // ============================================================

    let mut synthesis = Synthesis::default();
    for name in &players {
        let Some(member) = detail.members.get(*name) else {
            continue;
        };
        let Some(status) = member.battle_status else {
            continue;
        };
        let Some(&leader) = position.get(*name) else {
            continue;
        };
        synthesis.claim_team(status, leader, member.color, sides);
    }
    for name in &bots {
        let Some(bot) = detail.bots.get(*name) else {
            continue;
        };
        let Some(&leader) = position.get(bot.owner.as_str()) else {
            continue;
        };
        synthesis.claim_team(bot.battle_status, leader, bot.color, sides);
    }

    // Start rectangles not claimed by any synthesized ally team become
    // fresh ally teams of their own, in rectangle-key order.
    let mut rect_keys: Vec<u8> = detail.start_rects.keys().copied().collect();
    rect_keys.sort_unstable();
    for key in rect_keys {
        synthesis.ally_index(u32::from(key));
    }

    // ============================================================
    // Emission.
    // ============================================================

    let mut lines = Vec::new();
    lines.push("[GAME]".to_string());
    lines.push("{".to_string());

    push_kv(&mut lines, 1, "MapName", &running.battle.map_name);
    push_kv(&mut lines, 1, "GameType", &running.battle.game_name);
    let mut game_tags: Vec<(&str, &str)> = tags
        .iter()
        .filter_map(|(key, value)| {
            let rest = key.strip_prefix("game/")?;
            if rest.starts_with("modoptions/")
                || rest.starts_with("mapoptions/")
                || rest.starts_with("players/")
            {
                return None;
            }
            Some((rest, value.as_str()))
        })
        .collect();
    game_tags.sort_unstable();
    for (key, value) in game_tags {
        push_kv(&mut lines, 1, key, value);
    }

    push_kv(&mut lines, 1, "HostIP", &running.battle.ip);
    push_kv(&mut lines, 1, "HostPort", &running.battle.port.to_string());
    if autohost {
        push_kv(&mut lines, 1, "IsHost", "1");
        push_kv(&mut lines, 1, "AutoHostName", &running.self_name);
        if let Some(user) = running.users.get(&running.self_name) {
            push_kv(&mut lines, 1, "AutoHostCountryCode", &user.country);
            push_kv(&mut lines, 1, "AutoHostRank", &user.status.rank.to_string());
            push_kv(&mut lines, 1, "AutoHostAccountId", &user.account_id.to_string());
        }
    } else {
        push_kv(&mut lines, 1, "MyPlayerName", &running.self_name);
        if let Some(mine) = my_position {
            push_kv(&mut lines, 1, "MyPlayerNum", &mine.to_string());
        }
    }

    for (index, name) in order.iter().enumerate() {
        open_section(&mut lines, 1, &format!("PLAYER{index}"));
        push_kv(&mut lines, 2, "Name", name);
        let member = detail.members.get(*name);
        if let Some(password) = member.and_then(|m| m.script_password.as_deref()) {
            push_kv(&mut lines, 2, "Password", password);
        }
        let status = member.and_then(|m| m.battle_status);
        let playing = status.is_some_and(|s| s.mode);
        push_kv(&mut lines, 2, "Spectator", if playing { "0" } else { "1" });
        if let Some(status) = status.filter(|s| s.mode) {
            if let Some(&team) = synthesis.team_map.get(&status.effective_id()) {
                push_kv(&mut lines, 2, "Team", &team.to_string());
            }
        }
        if let Some(user) = running.users.get(*name) {
            push_kv(&mut lines, 2, "CountryCode", &user.country);
            push_kv(&mut lines, 2, "Rank", &user.status.rank.to_string());
            push_kv(&mut lines, 2, "AccountId", &user.account_id.to_string());
            if let Some(extra) = overlay.player_data.get(&user.account_id) {
                for (key, value) in extra {
                    push_kv(&mut lines, 2, key, value);
                }
            }
        }
        let lc = name.to_lowercase();
        if let Some(skill) = tags.get(&format!("game/players/{lc}/skill")) {
            push_kv(&mut lines, 2, "Skill", skill);
        }
        if let Some(uncertainty) = tags.get(&format!("game/players/{lc}/skilluncertainty")) {
            push_kv(&mut lines, 2, "SkillUncertainty", uncertainty);
        }
        close_section(&mut lines, 1);
    }

    for (index, name) in bots.iter().enumerate() {
        let Some(bot) = detail.bots.get(*name) else {
            continue;
        };
        open_section(&mut lines, 1, &format!("AI{index}"));
        push_kv(&mut lines, 2, "Name", name);
        let (short_name, version) = match bot.ai_label.split_once('|') {
            Some((short, version)) => (short, Some(version)),
            None => (bot.ai_label.as_str(), None),
        };
        push_kv(&mut lines, 2, "ShortName", short_name);
        if let Some(version) = version {
            push_kv(&mut lines, 2, "Version", version);
        }
        if let Some(&team) = synthesis.team_map.get(&bot.battle_status.effective_id()) {
            push_kv(&mut lines, 2, "Team", &team.to_string());
        }
        if let Some(&host) = position.get(bot.owner.as_str()) {
            push_kv(&mut lines, 2, "Host", &host.to_string());
        }
        if let Some(extra) = overlay.ai_data.get(*name) {
            for (key, value) in extra {
                push_kv(&mut lines, 2, key, value);
            }
        }
        close_section(&mut lines, 1);
    }

    for (index, team) in synthesis.teams.iter().enumerate() {
        open_section(&mut lines, 1, &format!("TEAM{index}"));
        push_kv(&mut lines, 2, "TeamLeader", &team.leader.to_string());
        push_kv(&mut lines, 2, "AllyTeam", &team.ally.to_string());
        push_kv(
            &mut lines,
            2,
            "RgbColor",
            &format!(
                "{:.5} {:.5} {:.5}",
                f64::from(team.color.red) / 255.0,
                f64::from(team.color.green) / 255.0,
                f64::from(team.color.blue) / 255.0
            ),
        );
        push_kv(&mut lines, 2, "Handicap", &team.bonus.to_string());
        if let Some(side) = team.side {
            push_kv(&mut lines, 2, "Side", &sides[side]);
        }
        close_section(&mut lines, 1);
    }

    for (index, source) in synthesis.ally_sources.iter().enumerate() {
        open_section(&mut lines, 1, &format!("ALLYTEAM{index}"));
        push_kv(&mut lines, 2, "NumAllies", "0");
        let rect = u8::try_from(*source)
            .ok()
            .and_then(|key| detail.start_rects.get(&key));
        if let Some(rect) = rect {
            push_kv(&mut lines, 2, "StartRectLeft", &rect_fraction(rect.left));
            push_kv(&mut lines, 2, "StartRectTop", &rect_fraction(rect.top));
            push_kv(&mut lines, 2, "StartRectRight", &rect_fraction(rect.right));
            push_kv(&mut lines, 2, "StartRectBottom", &rect_fraction(rect.bottom));
        }
        close_section(&mut lines, 1);
    }

    open_section(&mut lines, 1, "RESTRICT");
    let mut units: Vec<&str> = detail.disabled_units.iter().map(String::as_str).collect();
    units.sort_unstable();
    push_kv(&mut lines, 2, "NumRestrictions", &units.len().to_string());
    for (index, unit) in units.iter().enumerate() {
        push_kv(&mut lines, 2, &format!("Unit{index}"), unit);
        push_kv(&mut lines, 2, &format!("Limit{index}"), "0");
    }
    close_section(&mut lines, 1);

    emit_option_section(&mut lines, "MODOPTIONS", &tags, "game/modoptions/");
    emit_option_section(&mut lines, "MAPOPTIONS", &tags, "game/mapoptions/");

    for (name, entries) in &overlay.sections {
        open_section(&mut lines, 1, name);
        for (key, value) in entries {
            push_kv(&mut lines, 2, key, value);
        }
        close_section(&mut lines, 1);
    }

    lines.push("}".to_string());

    StartScript {
        lines,
        team_map: synthesis.team_map,
        ally_team_map: synthesis.ally_team_map,
    }
}

fn clamp_side(side: u32, sides: &[String], team: u32) -> Option<usize> {
    if sides.is_empty() {
        warn!(team, "no side list provided, omitting faction");
        return None;
    }
    let index = side as usize;
    if index < sides.len() {
        Some(index)
    } else {
        warn!(team, side, "side index out of range, clamping to last side");
        Some(sides.len() - 1)
    }
}

/// Skill ordering key for a spectator: skill tag (default 0) and
/// skill-uncertainty tag (default 10), markers and units stripped.
fn spectator_rating(tags: &HashMap<String, String>, name: &str) -> (f64, f64) {
    let lc = name.to_lowercase();
    let skill = numeric_tag(tags, &format!("game/players/{lc}/skill"), 0.0, name);
    let uncertainty = numeric_tag(
        tags,
        &format!("game/players/{lc}/skilluncertainty"),
        10.0,
        name,
    );
    (skill, uncertainty)
}

fn numeric_tag(tags: &HashMap<String, String>, key: &str, default: f64, user: &str) -> f64 {
    let Some(raw) = tags.get(key) else {
        return default;
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
        .collect();
    match cleaned.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(user, key, value = %raw, "unparsable numeric script tag, using default");
            default
        }
    }
}

fn rect_fraction(coordinate: u32) -> String {
    (f64::from(coordinate) / 200.0).to_string()
}

fn push_kv(lines: &mut Vec<String>, depth: usize, key: &str, value: &str) {
    lines.push(format!("{}{key}={value};", "\t".repeat(depth)));
}

fn open_section(lines: &mut Vec<String>, depth: usize, name: &str) {
    let indent = "\t".repeat(depth);
    lines.push(format!("{indent}[{name}]"));
    lines.push(format!("{indent}{{"));
}

fn close_section(lines: &mut Vec<String>, depth: usize) {
    lines.push(format!("{}}}", "\t".repeat(depth)));
}

fn emit_option_section(
    lines: &mut Vec<String>,
    name: &str,
    tags: &HashMap<String, String>,
    prefix: &str,
) {
    open_section(lines, 1, name);
    let mut entries: Vec<(&str, &str)> = tags
        .iter()
        .filter_map(|(key, value)| Some((key.strip_prefix(prefix)?, value.as_str())))
        .collect();
    entries.sort_unstable();
    for (key, value) in entries {
        push_kv(lines, 2, key, value);
    }
    close_section(lines, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActiveBattle, Battle, Bot, MemberDetail, StartRect, User};

    fn member(status: Option<BattleStatus>) -> MemberDetail {
        MemberDetail {
            battle_status: status,
            ..MemberDetail::default()
        }
    }

    fn playing(id: u32, team: u32, side: u32) -> BattleStatus {
        BattleStatus {
            id,
            team,
            side,
            mode: true,
            ..BattleStatus::default()
        }
    }

    fn snapshot(members: Vec<(&str, Option<BattleStatus>)>) -> RunningBattle {
        let mut detail = ActiveBattle::new(7);
        let mut users = std::collections::HashMap::new();
        let mut names = Vec::new();
        for (name, status) in members {
            detail.members.insert(name.to_string(), member(status));
            users.insert(name.to_string(), User::new("??".to_string(), 0, String::new()));
            names.push(name.to_string());
        }
        let battle = Battle {
            founder: names.first().cloned().unwrap_or_default(),
            ip: "192.168.1.10".to_string(),
            port: 8452,
            map_name: "Comet Catcher Redux".to_string(),
            game_name: "Balanced Annihilation V9.46".to_string(),
            members: names,
            ..Battle::default()
        };
        RunningBattle {
            battle,
            detail,
            users,
            self_name: "Purple".to_string(),
        }
    }

    fn sides() -> Vec<String> {
        vec!["ARM".to_string(), "CORE".to_string()]
    }

    fn section<'a>(script: &'a StartScript, name: &str) -> Vec<&'a str> {
        let header = format!("\t[{name}]");
        let start = script
            .lines
            .iter()
            .position(|line| *line == header)
            .unwrap_or_else(|| panic!("missing section {name}"));
        script.lines[start + 2..]
            .iter()
            .take_while(|line| *line != "\t}")
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn players_sort_by_id_and_spectators_by_skill() {
        let mut running = snapshot(vec![
            ("Purple", Some(playing(1, 0, 0))),
            ("Amber", Some(playing(0, 0, 0))),
            ("Watcher", Some(BattleStatus::default())),
            ("Caster", Some(BattleStatus::default())),
        ]);
        running.detail.script_tags.insert(
            "game/players/caster/skill".to_string(),
            "#25.1#".to_string(),
        );
        running
            .detail
            .script_tags
            .insert("game/players/watcher/skill".to_string(), "12".to_string());

        let script = generate(&running, &sides(), false, &StartScriptOverlay::default());
        let names: Vec<&str> = script
            .lines
            .iter()
            .filter_map(|line| line.strip_prefix("\t\tName=")?.strip_suffix(';'))
            .collect();
        assert_eq!(names, vec!["Amber", "Purple", "Caster", "Watcher"]);
        assert!(script.lines.contains(&"\tMyPlayerNum=1;".to_string()));
    }

    #[test]
    fn autohost_first_member_is_dropped() {
        let running = snapshot(vec![
            ("Purple", None),
            ("Amber", Some(playing(0, 0, 0))),
        ]);
        let script = generate(&running, &sides(), true, &StartScriptOverlay::default());
        assert!(!script.lines.contains(&"\t\tName=Purple;".to_string()));
        assert!(script.lines.contains(&"\tIsHost=1;".to_string()));
        assert!(script.lines.contains(&"\tAutoHostName=Purple;".to_string()));
    }

    #[test]
    fn out_of_range_side_clamps_to_last() {
        let running = snapshot(vec![("Purple", Some(playing(0, 0, 9)))]);
        let script = generate(&running, &sides(), false, &StartScriptOverlay::default());
        assert!(section(&script, "TEAM0").contains(&"\t\tSide=CORE;"));
    }

    #[test]
    fn shared_player_number_shares_a_team() {
        let mut running = snapshot(vec![
            ("Purple", Some(playing(0, 0, 0))),
            ("Amber", Some(playing(0, 0, 1))),
        ]);
        running.detail.bots.insert(
            "Bitey".to_string(),
            Bot {
                owner: "Amber".to_string(),
                battle_status: playing(0, 0, 0),
                color: Color::default(),
                ai_label: "KAIK|0.13".to_string(),
            },
        );
        running.detail.bot_names.push("Bitey".to_string());

        let script = generate(&running, &sides(), false, &StartScriptOverlay::default());
        assert_eq!(script.team_map.len(), 1);
        assert!(!script.lines.iter().any(|l| l.starts_with("\t[TEAM1]")));
        let ai = section(&script, "AI0");
        assert!(ai.contains(&"\t\tShortName=KAIK;"));
        assert!(ai.contains(&"\t\tVersion=0.13;"));
        assert!(ai.contains(&"\t\tTeam=0;"));
    }

    #[test]
    fn unclaimed_start_rect_becomes_a_new_ally_team() {
        let mut running = snapshot(vec![("Purple", Some(playing(0, 0, 0)))]);
        running.detail.start_rects.insert(
            3,
            StartRect {
                left: 0,
                top: 50,
                right: 100,
                bottom: 200,
            },
        );
        let script = generate(&running, &sides(), false, &StartScriptOverlay::default());
        assert_eq!(script.ally_team_map.get(&0), Some(&0));
        assert_eq!(script.ally_team_map.get(&3), Some(&1));
        let appended = section(&script, "ALLYTEAM1");
        assert!(appended.contains(&"\t\tStartRectTop=0.25;"));
        assert!(appended.contains(&"\t\tStartRectRight=0.5;"));
        assert!(appended.contains(&"\t\tStartRectBottom=1;"));
    }

    #[test]
    fn option_sections_filter_by_prefix() {
        let mut running = snapshot(vec![("Purple", Some(playing(0, 0, 0)))]);
        let tags = &mut running.detail.script_tags;
        tags.insert("game/startpostype".to_string(), "2".to_string());
        tags.insert("game/modoptions/deathmode".to_string(), "com".to_string());
        tags.insert("game/mapoptions/waterlevel".to_string(), "5".to_string());
        tags.insert(
            "game/players/purple/skill".to_string(),
            "20".to_string(),
        );

        let overlay = StartScriptOverlay {
            game: vec![(
                "game/modoptions/startmetal".to_string(),
                "1000".to_string(),
            )],
            ..StartScriptOverlay::default()
        };
        let script = generate(&running, &sides(), false, &overlay);

        assert!(script.lines.contains(&"\tstartpostype=2;".to_string()));
        assert!(!script.lines.contains(&"\tmodoptions/deathmode=com;".to_string()));
        let modoptions = section(&script, "MODOPTIONS");
        assert_eq!(modoptions, vec!["\t\tdeathmode=com;", "\t\tstartmetal=1000;"]);
        assert_eq!(section(&script, "MAPOPTIONS"), vec!["\t\twaterlevel=5;"]);

        // The player bucket feeds the player section, not [GAME].
        assert!(!script.lines.iter().any(|l| l.contains("players/purple")));
        assert!(section(&script, "PLAYER0").contains(&"\t\tSkill=20;"));
    }

    #[test]
    fn for_state_without_battle_fails() {
        let state = LobbyState::default();
        let overlay = StartScriptOverlay::default();
        assert_eq!(
            for_state(&state, &sides(), false, &overlay).map(|_| ()),
            Err(ScriptError::NoBattle)
        );
    }
}
