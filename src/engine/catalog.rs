use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::config::DEFAULT_STREAM_QUALITY;
use crate::error::{AppError, Result};
use crate::state::SiteState;
use crate::types::{BettingOption, LiveStream, NewBettingOption, NewLiveStream, StreamStatus};

fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().map_or(1, |m| m + 1)
}

fn option_index(options: &[BettingOption], id: u64) -> Result<usize> {
    options
        .iter()
        .position(|o| o.id == id)
        .ok_or_else(|| AppError::NotFound(format!("betting option {id}")))
}

fn stream_index(streams: &[LiveStream], id: u64) -> Result<usize> {
    streams
        .iter()
        .position(|s| s.id == id)
        .ok_or_else(|| AppError::NotFound(format!("live stream {id}")))
}

fn check_unique(ids: impl Iterator<Item = u64>, what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(AppError::InvalidInput(format!("duplicate {what} id {id}")));
        }
    }
    Ok(())
}

/// Writes `updated` over the option with the same id and brings its streams
/// in line with the `live_stream` flag and title.
fn apply_option(
    options: &mut [BettingOption],
    streams: &mut Vec<LiveStream>,
    updated: BettingOption,
) -> Result<BettingOption> {
    let idx = option_index(options, updated.id)?;
    let has_stream = streams.iter().any(|s| s.option_id == Some(updated.id));
    if updated.live_stream && !has_stream {
        open_stream_for(streams, &updated, None);
    } else if !updated.live_stream {
        streams.retain(|s| s.option_id != Some(updated.id));
    }
    for s in streams.iter_mut().filter(|s| s.option_id == Some(updated.id)) {
        s.name = updated.title.clone();
    }
    options[idx] = updated.clone();
    Ok(updated)
}

/// Appends a live stream for `option`.
fn open_stream_for(streams: &mut Vec<LiveStream>, option: &BettingOption, url: Option<String>) -> LiveStream {
    let id = next_id(streams.iter().map(|s| s.id));
    let stream = LiveStream {
        id,
        option_id: Some(option.id),
        name: option.title.clone(),
        url: url.unwrap_or_else(|| format!("https://example.com/stream{id}")),
        status: StreamStatus::Live,
        quality: DEFAULT_STREAM_QUALITY.to_string(),
        viewers: 0,
        scheduled_time: None,
    };
    streams.push(stream.clone());
    stream
}

/// Admin management of betting options and their live streams. Streams link
/// to options through `option_id`; the option's `live_stream` flag is kept in
/// step with whether any stream links to it.
pub struct Catalog {
    state: Arc<SiteState>,
}

impl Catalog {
    pub fn new(state: Arc<SiteState>) -> Self {
        Self { state }
    }

    pub fn add_option(&self, fields: NewBettingOption) -> Result<BettingOption> {
        let option = self.state.with_catalog(|options, streams| {
            let option = BettingOption {
                id: next_id(options.iter().map(|o| o.id)),
                title: fields.title.trim().to_string(),
                description: fields.description,
                option1: fields.option1.trim().to_string(),
                option2: fields.option2.trim().to_string(),
                odds1: fields.odds1,
                odds2: fields.odds2,
                active: fields.active,
                live_stream: fields.live_stream,
            };
            option.validate()?;
            if option.live_stream {
                open_stream_for(streams, &option, None);
            }
            options.push(option.clone());
            Ok(option)
        })?;
        info!(event_id = option.id, title = %option.title, "[CATALOG] option added");
        Ok(option)
    }

    /// Replaces an option. Turning `live_stream` on or off opens or closes
    /// its stream; linked streams follow a title change.
    pub fn update_option(&self, updated: BettingOption) -> Result<BettingOption> {
        updated.validate()?;
        self.state
            .with_catalog(|options, streams| apply_option(options, streams, updated))
    }

    /// Replaces the whole option list. Ids must be unique. Streams follow the
    /// new `live_stream` flags and streams of removed options are dropped.
    pub fn replace_options(&self, list: Vec<BettingOption>) -> Result<Vec<BettingOption>> {
        for o in &list {
            o.validate()?;
        }
        check_unique(list.iter().map(|o| o.id), "betting option")?;
        let list = self.state.with_catalog(|options, streams| {
            *options = list;
            streams.retain(|s| match s.option_id {
                Some(id) => options.iter().any(|o| o.id == id && o.live_stream),
                None => true,
            });
            for o in options.iter().filter(|o| o.live_stream) {
                if !streams.iter().any(|s| s.option_id == Some(o.id)) {
                    open_stream_for(streams, o, None);
                }
            }
            Ok(options.clone())
        })?;
        info!(count = list.len(), "[CATALOG] option list replaced");
        Ok(list)
    }

    pub fn delete_option(&self, id: u64) -> Result<()> {
        self.state.with_catalog(|options, streams| {
            let idx = option_index(options, id)?;
            options.remove(idx);
            streams.retain(|s| s.option_id != Some(id));
            Ok(())
        })?;
        info!(event_id = id, "[CATALOG] option deleted");
        Ok(())
    }

    pub fn toggle_active(&self, id: u64) -> Result<BettingOption> {
        self.state.with_catalog(|options, _| {
            let idx = option_index(options, id)?;
            options[idx].active = !options[idx].active;
            Ok(options[idx].clone())
        })
    }

    pub fn toggle_live_stream(&self, id: u64) -> Result<BettingOption> {
        self.state.with_catalog(|options, streams| {
            let idx = option_index(options, id)?;
            let mut option = options[idx].clone();
            option.live_stream = !option.live_stream;
            apply_option(options, streams, option)
        })
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    pub fn add_stream(&self, fields: NewLiveStream) -> Result<LiveStream> {
        let stream = self.state.with_catalog(|options, streams| {
            if let Some(option_id) = fields.option_id {
                let idx = option_index(options, option_id)?;
                options[idx].live_stream = true;
            }
            let stream = LiveStream {
                id: next_id(streams.iter().map(|s| s.id)),
                option_id: fields.option_id,
                name: fields.name.trim().to_string(),
                url: fields.url.trim().to_string(),
                status: fields.status,
                quality: fields.quality.unwrap_or_else(|| DEFAULT_STREAM_QUALITY.to_string()),
                viewers: 0,
                scheduled_time: fields.scheduled_time,
            };
            if stream.name.is_empty() {
                return Err(AppError::InvalidInput("stream name must not be empty".into()));
            }
            streams.push(stream.clone());
            Ok(stream)
        })?;
        info!(stream_id = stream.id, option_id = ?stream.option_id, "[CATALOG] stream added");
        Ok(stream)
    }

    /// Live becomes paused; anything else goes live.
    pub fn toggle_stream_status(&self, id: u64) -> Result<LiveStream> {
        self.state.with_catalog(|_, streams| {
            let idx = stream_index(streams, id)?;
            let s = &mut streams[idx];
            s.status = match s.status {
                StreamStatus::Live => StreamStatus::Paused,
                _ => StreamStatus::Live,
            };
            Ok(s.clone())
        })
    }

    pub fn set_stream_status(&self, id: u64, status: StreamStatus) -> Result<LiveStream> {
        self.state.with_catalog(|_, streams| {
            let idx = stream_index(streams, id)?;
            streams[idx].status = status;
            Ok(streams[idx].clone())
        })
    }

    pub fn delete_stream(&self, id: u64) -> Result<()> {
        self.state.with_catalog(|options, streams| {
            let idx = stream_index(streams, id)?;
            let removed = streams.remove(idx);
            if let Some(option_id) = removed.option_id {
                let still_linked = streams.iter().any(|s| s.option_id == Some(option_id));
                if let Some(o) = options.iter_mut().find(|o| o.id == option_id) {
                    o.live_stream = still_linked;
                }
            }
            Ok(())
        })?;
        info!(stream_id = id, "[CATALOG] stream deleted");
        Ok(())
    }

    /// Replaces the whole stream list. Stream ids must be unique and every
    /// `option_id` must name an existing option. Option flags are recomputed
    /// from the new links.
    pub fn replace_streams(&self, list: Vec<LiveStream>) -> Result<Vec<LiveStream>> {
        check_unique(list.iter().map(|s| s.id), "live stream")?;
        let list = self.state.with_catalog(|options, streams| {
            if let Some(orphan) = list
                .iter()
                .filter_map(|s| s.option_id)
                .find(|id| !options.iter().any(|o| o.id == *id))
            {
                return Err(AppError::InvalidInput(format!(
                    "stream links to unknown betting option {orphan}"
                )));
            }
            *streams = list;
            for o in options.iter_mut() {
                o.live_stream = streams.iter().any(|s| s.option_id == Some(o.id));
            }
            Ok(streams.clone())
        })?;
        info!(count = list.len(), "[CATALOG] stream list replaced");
        Ok(list)
    }

    /// Opens a mobile-camera stream (empty url) for the first active option
    /// that has no stream yet.
    pub fn start_mobile_stream(&self) -> Result<LiveStream> {
        let stream = self.state.with_catalog(|options, streams| {
            let option = options
                .iter_mut()
                .find(|o| o.active && !o.live_stream)
                .ok_or_else(|| AppError::NotFound("active betting option without a stream".into()))?;
            option.live_stream = true;
            Ok(open_stream_for(streams, option, Some(String::new())))
        })?;
        info!(stream_id = stream.id, option_id = ?stream.option_id, "[CATALOG] mobile stream started");
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
