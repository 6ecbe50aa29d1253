//! Ampache request opcodes and their query-string recipes, grounded on
//! `AmpacheServer::startOperations`. An [`OpCode`] plus its [`OpData`] is
//! enough to build the exact query Ampache expects; the reply parser only
//! needs the opcode's primary element to know which repeated child element
//! becomes one result record.

use std::collections::HashMap;

pub type OpData = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Search,
    BrowseRoot,
    BrowseArtist,
    BrowseAlbum,
    PlaylistRoot,
    PlaylistSongs,
    RadioStations,
    Tags,
    SetFlag,
    Shuffle,
    CountFlagged,
    Song,
}

/// The single repeated child element whose occurrences become result
/// records for this opcode's reply.
pub fn primary_element(opcode: OpCode, api_version: i64) -> &'static str {
    match opcode {
        OpCode::Search => "song",
        OpCode::BrowseRoot => "artist",
        OpCode::BrowseArtist => "album",
        OpCode::BrowseAlbum => "song",
        OpCode::PlaylistRoot => "playlist",
        OpCode::PlaylistSongs => "song",
        OpCode::RadioStations => "live_stream",
        OpCode::Tags => {
            if api_version >= 5_000_000 {
                "genre"
            } else {
                "tag"
            }
        }
        OpCode::SetFlag => "song",
        OpCode::Shuffle => "song",
        OpCode::CountFlagged => "song",
        OpCode::Song => "song",
    }
}

/// Builds the query-string parameters for `opcode`, given its `data` and the
/// session's negotiated `api_version`. `auth` is the live session token.
/// Appends `limit=none` unless the server falls in the two legacy versions
/// that reject it, matching the original client's blanket rule.
pub fn build_query(opcode: OpCode, data: &OpData, api_version: i64, auth: &str) -> Vec<(String, String)> {
    let mut query = vec![("auth".to_string(), auth.to_string())];

    match opcode {
        OpCode::Search => {
            query.push(("action".into(), "advanced_search".into()));
            query.push(("rule_1".into(), "title".into()));
            query.push(("rule_1_operator".into(), "0".into()));
            query.push(("rule_1_input".into(), data.get("criteria").cloned().unwrap_or_default()));
        }
        OpCode::BrowseRoot => {
            query.push(("action".into(), "artists".into()));
        }
        OpCode::BrowseArtist => {
            query.push(("action".into(), "artist_albums".into()));
            query.push(("filter".into(), data.get("artist").cloned().unwrap_or_default()));
        }
        OpCode::BrowseAlbum => {
            query.push(("action".into(), "album_songs".into()));
            query.push(("filter".into(), data.get("album").cloned().unwrap_or_default()));
        }
        OpCode::PlaylistRoot => {
            query.push(("action".into(), "get_indexes".into()));
            query.push(("type".into(), "playlist".into()));
        }
        OpCode::PlaylistSongs => {
            query.push(("action".into(), "playlist_songs".into()));
            query.push(("filter".into(), data.get("playlist").cloned().unwrap_or_default()));
        }
        OpCode::RadioStations => {
            query.push(("action".into(), "get_indexes".into()));
            query.push(("type".into(), "live_stream".into()));
        }
        OpCode::Tags => {
            query.push((
                "action".into(),
                if api_version >= 5_000_000 { "genres".into() } else { "tags".into() },
            ));
        }
        OpCode::SetFlag => {
            query.push(("action".into(), "flag".into()));
            query.push(("type".into(), "song".into()));
            query.push(("id".into(), data.get("song_id").cloned().unwrap_or_default()));
            query.push(("flag".into(), data.get("flag").cloned().unwrap_or_default()));
        }
        OpCode::CountFlagged => {
            query.push(("action".into(), "playlist_generate".into()));
            query.push(("flag".into(), "1".into()));
            query.push(("format".into(), "index".into()));
            return query;
        }
        OpCode::Song => {
            query.push(("action".into(), "song".into()));
            query.push(("filter".into(), data.get("song_id").cloned().unwrap_or_default()));
            return query;
        }
        OpCode::Shuffle => build_shuffle_query(&mut query, data),
    }

    if api_version != 424_000 && api_version != 425_000 && !query.iter().any(|(k, _)| k == "limit") {
        query.push(("limit".into(), "none".into()));
    }

    query
}

fn build_shuffle_query(query: &mut Vec<(String, String)>, data: &OpData) {
    let limit = data.get("limit").cloned().unwrap_or_else(|| "1".to_string());

    if data.contains_key("favorite") {
        query.push(("action".into(), "playlist_generate".into()));
        query.push(("mode".into(), "random".into()));
        query.push(("flag".into(), "1".into()));
        query.push(("limit".into(), limit));
    } else if let Some(artist) = data.get("artist") {
        query.push(("action".into(), "playlist_generate".into()));
        query.push(("artist".into(), artist.clone()));
        query.push(("limit".into(), limit));
    } else if data.contains_key("recent") {
        query.push(("action".into(), "advanced_search".into()));
        query.push(("type".into(), "song".into()));
        query.push(("random".into(), "1".into()));
        query.push(("rule_1".into(), "recent_added".into()));
        query.push(("rule_1_operator".into(), "0".into()));
        query.push(("rule_1_input".into(), "100".into()));
        query.push(("limit".into(), limit));
    } else if let Some(tags) = data.get("tags").filter(|t| !t.is_empty()) {
        query.push(("action".into(), "advanced_search".into()));
        query.push(("random".into(), "1".into()));
        query.push(("operator".into(), data.get("tag_operator").cloned().unwrap_or_else(|| "or".into())));
        for (i, tag) in tags.split(',').enumerate() {
            let n = i + 1;
            query.push((format!("rule_{n}"), "tag".into()));
            query.push((format!("rule_{n}_operator"), "4".into()));
            query.push((format!("rule_{n}_input"), tag.to_string()));
        }
        query.push(("limit".into(), limit));
    } else {
        query.push(("action".into(), "playlist_generate".into()));
        query.push(("limit".into(), limit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_opcode_uses_genres_on_modern_api() {
        let query = build_query(OpCode::Tags, &OpData::new(), 6_000_000, "tok");
        assert!(query.contains(&("action".to_string(), "genres".to_string())));
    }

    #[test]
    fn tags_opcode_uses_tags_on_legacy_api() {
        let query = build_query(OpCode::Tags, &OpData::new(), 4_000_000, "tok");
        assert!(query.contains(&("action".to_string(), "tags".to_string())));
    }

    #[test]
    fn legacy_versions_never_get_limit_none() {
        let query = build_query(OpCode::BrowseRoot, &OpData::new(), 424_000, "tok");
        assert!(!query.iter().any(|(k, v)| k == "limit" && v == "none"));
    }

    #[test]
    fn shuffle_favorite_branch_sets_flag_and_mode() {
        let mut data = OpData::new();
        data.insert("favorite".into(), "1".into());
        data.insert("limit".into(), "3".into());
        let query = build_query(OpCode::Shuffle, &data, 6_000_000, "tok");
        assert!(query.contains(&("mode".to_string(), "random".to_string())));
        assert!(query.contains(&("flag".to_string(), "1".to_string())));
        assert!(query.contains(&("limit".to_string(), "3".to_string())));
    }
}
