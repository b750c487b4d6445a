//! # Relay Engine
//!
//! Turns one inbound utterance into N translated deliveries. The stages run
//! strictly in order:
//!
//! 1. **Validation**: required fields present, audio decodes and fits the size limits
//! 2. **Admission**: per-connection rate limit
//! 3. **Transcription** (audio only): speech-to-text with the source language as hint
//! 4. **Target resolution**: distinct languages of the other members, minus the source
//! 5. **Translation**: per target, cache first, provider chain on a miss
//! 6. **Synthesis** (audio only): speech for each translation
//! 7. **Delivery**: each translation goes to every member speaking that language,
//!    then the original text is echoed to the sender
//!
//! ## Partial failure:
//! Targets are processed concurrently and independently. One target running out
//! of providers is reported to the sender, and the other targets are still
//! delivered.
//!
//! ## Concurrency:
//! The engine is shared behind an `Arc` and called from many connection actors
//! at once. Its collaborators guard their own state; the engine itself holds no
//! lock across an `.await`. Consecutive utterances from one sender are not
//! sequenced, so a later one may be delivered first.

use super::cache::TranslationCache;
use super::events::{
    AudioStream, JoinRoom, MemberView, OutboundEvent, Presence, RoomState, SendText, Signal,
    SignalKind, Transcription, TranslatedAudio, TranslatedText,
};
use super::rate_limit::RateLimiter;
use super::rooms::{RoomRegistry, RoomSummary};
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::providers::ProviderSet;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where outbound events go. The WebSocket gateway implements this; tests
/// record into a vector.
///
/// Delivering to a connection that no longer exists must be a silent no-op.
pub trait EventSink: Send + Sync {
    fn deliver(&self, connection_id: &str, event: OutboundEvent);

    /// False once the connection has closed.
    fn is_connected(&self, connection_id: &str) -> bool;
}

/// Shared services the engine is built from.
///
/// Each one is an explicit object with its own lifetime, so tests can build
/// an isolated set and the HTTP layer can read them for health and stats.
#[derive(Clone)]
pub struct RelayServices {
    pub rooms: Arc<RoomRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<TranslationCache>,
    pub providers: Arc<ProviderSet>,
}

impl RelayServices {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            rooms: Arc::new(RoomRegistry::new()),
            limiter: Arc::new(RateLimiter::new(
                config.relay.rate_limit_max_requests,
                config.rate_limit_window(),
            )),
            cache: Arc::new(TranslationCache::new(config.relay.cache_max_size)),
            providers: Arc::new(ProviderSet::from_config(&config.providers)),
        }
    }
}

/// Accepted size range of decoded audio clips, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct AudioLimits {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl AudioLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_bytes: config.relay.min_audio_bytes,
            max_bytes: config.relay.max_audio_bytes,
        }
    }
}

/// Relay-level counters for the metrics endpoint.
#[derive(Debug, Default)]
pub struct RelayCounters {
    utterances: AtomicU64,
    deliveries: AtomicU64,
    rate_limited: AtomicU64,
    invalid_input: AtomicU64,
    target_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelayCountersSnapshot {
    pub utterances: u64,
    pub deliveries: u64,
    pub rate_limited: u64,
    pub invalid_input: u64,
    pub target_failures: u64,
}

impl RelayCounters {
    pub fn snapshot(&self) -> RelayCountersSnapshot {
        RelayCountersSnapshot {
            utterances: self.utterances.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            invalid_input: self.invalid_input.load(Ordering::Relaxed),
            target_failures: self.target_failures.load(Ordering::Relaxed),
        }
    }
}

/// Read-only summary for the health query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub active_room_count: usize,
    pub total_member_count: usize,
    pub cache_size: usize,
    pub offline_mode: bool,
}

/// Read-only per-room listing for the stats query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub rooms: Vec<RoomSummary>,
    pub total_rooms: usize,
    pub cache_size: usize,
}

/// The text being relayed and whether recipients also get speech.
struct Utterance<'a> {
    room_id: &'a str,
    text: &'a str,
    source_language: &'a str,
    with_audio: bool,
}

pub struct RelayEngine {
    services: RelayServices,
    sink: Arc<dyn EventSink>,
    audio_limits: AudioLimits,
    counters: RelayCounters,
}

impl RelayEngine {
    pub fn new(services: RelayServices, sink: Arc<dyn EventSink>, audio_limits: AudioLimits) -> Self {
        Self {
            services,
            sink,
            audio_limits,
            counters: RelayCounters::default(),
        }
    }

    pub fn services(&self) -> &RelayServices {
        &self.services
    }

    pub fn counters(&self) -> RelayCountersSnapshot {
        self.counters.snapshot()
    }

    /// Add the connection to a room and tell everyone about it.
    ///
    /// The joiner receives `room-state` with the other members; every other
    /// member receives `user-connected`.
    pub fn join(&self, connection_id: &str, request: JoinRoom) {
        let validated = required(&request.room_id, "roomId")
            .and_then(|room_id| Ok((room_id, required(&request.language, "language")?)));
        let (room_id, language) = match validated {
            Ok(fields) => fields,
            Err(err) => return self.report(connection_id, &err),
        };

        let outcome = self.services.rooms.join(room_id, connection_id, language);
        info!(
            connection_id = %connection_id,
            room_id = %outcome.room_id,
            language = %language,
            rejoined = outcome.rejoined,
            "Connection joined room"
        );

        self.sink.deliver(
            connection_id,
            OutboundEvent::RoomState(RoomState {
                room_id: outcome.room_id.clone(),
                members: outcome
                    .others
                    .iter()
                    .map(|m| MemberView {
                        connection_id: m.connection_id.clone(),
                        language: m.language.clone(),
                    })
                    .collect(),
            }),
        );

        for member in &outcome.others {
            self.sink.deliver(
                &member.connection_id,
                OutboundEvent::UserConnected(Presence {
                    connection_id: connection_id.to_string(),
                    language: Some(language.to_string()),
                }),
            );
        }
    }

    /// Remove the connection from every room; remaining members get `user-disconnected`.
    pub fn leave(&self, connection_id: &str) {
        for departure in self.services.rooms.leave(connection_id) {
            info!(connection_id = %connection_id, room_id = %departure.room_id, "Connection left room");
            for remaining in &departure.remaining {
                self.sink.deliver(
                    remaining,
                    OutboundEvent::UserDisconnected(Presence {
                        connection_id: connection_id.to_string(),
                        language: Some(departure.member.language.clone()),
                    }),
                );
            }
        }
    }

    /// Forget everything about a closed connection.
    ///
    /// In-flight translations for it keep running; their deliveries simply
    /// find no recipient. Utterances that have not been admitted yet are
    /// dropped once the sink reports the connection closed.
    pub fn disconnect(&self, connection_id: &str) {
        self.leave(connection_id);
        self.services.limiter.forget(connection_id);
    }

    /// Forward a WebRTC signaling message to the other room members untouched.
    pub fn relay_signal(&self, connection_id: &str, kind: SignalKind, signal: Signal) {
        let room_id = match required(&signal.room_id, "roomId") {
            Ok(room_id) => room_id,
            Err(err) => return self.report(connection_id, &err),
        };

        for peer in self.services.rooms.other_members(room_id, connection_id) {
            self.sink
                .deliver(&peer, OutboundEvent::signal(kind, connection_id, signal.payload.clone()));
        }
    }

    /// Relay a typed message (pipeline from target resolution onwards).
    pub async fn relay_text(&self, connection_id: &str, request: SendText) {
        if let Err(err) = self.process_text(connection_id, &request).await {
            self.report(connection_id, &err);
        }
    }

    /// Relay a spoken clip through the full pipeline.
    pub async fn relay_audio(&self, connection_id: &str, request: AudioStream) {
        if let Err(err) = self.process_audio(connection_id, &request).await {
            self.report(connection_id, &err);
        }
    }

    async fn process_text(&self, connection_id: &str, request: &SendText) -> Result<(), RelayError> {
        let room_id = required(&request.room_id, "roomId")?;
        let text = required(&request.text, "text")?;
        let source_language = required(&request.source_language, "sourceLanguage")?;

        if !self.admit(connection_id)? {
            return Ok(());
        }

        let utterance = Utterance {
            room_id,
            text,
            source_language,
            with_audio: false,
        };
        self.fan_out(connection_id, &utterance).await;
        Ok(())
    }

    async fn process_audio(&self, connection_id: &str, request: &AudioStream) -> Result<(), RelayError> {
        let room_id = required(&request.room_id, "roomId")?;
        let source_language = required(&request.source_language, "sourceLanguage")?;
        let encoded = required(&request.audio_data, "audioData")?;
        let audio = self.decode_audio(encoded)?;

        if !self.admit(connection_id)? {
            return Ok(());
        }

        let transcript = self
            .services
            .providers
            .stt
            .transcribe(&audio, source_language)
            .await?;

        let text = transcript.trim();
        if text.is_empty() {
            debug!(connection_id = %connection_id, "Blank transcript, nothing to relay");
            return Ok(());
        }

        let utterance = Utterance {
            room_id,
            text,
            source_language,
            with_audio: true,
        };
        self.fan_out(connection_id, &utterance).await;
        Ok(())
    }

    /// Charge one request to the sender's quota.
    ///
    /// Returns `Ok(false)` when the sender has already closed. Utterances run
    /// as separate tasks, so one can start after `disconnect` cleared the
    /// limiter; the second check undoes the quota entry it would re-create.
    /// The gateway unregisters a connection before calling `disconnect`.
    fn admit(&self, connection_id: &str) -> Result<bool, RelayError> {
        if !self.sink.is_connected(connection_id) {
            debug!(connection_id = %connection_id, "Sender closed before its utterance ran");
            return Ok(false);
        }

        self.services.limiter.check(connection_id)?;

        if !self.sink.is_connected(connection_id) {
            self.services.limiter.forget(connection_id);
            return Ok(false);
        }

        self.counters.utterances.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn decode_audio(&self, encoded: &str) -> Result<Vec<u8>, RelayError> {
        let audio = BASE64
            .decode(encoded)
            .map_err(|e| RelayError::InvalidInput(format!("audioData is not valid base64: {}", e)))?;

        if audio.len() < self.audio_limits.min_bytes {
            return Err(RelayError::InvalidInput(format!(
                "Invalid audio data: buffer too small ({} bytes)",
                audio.len()
            )));
        }
        if audio.len() > self.audio_limits.max_bytes {
            return Err(RelayError::InvalidInput(format!(
                "Invalid audio data: buffer too large (max {} bytes)",
                self.audio_limits.max_bytes
            )));
        }
        Ok(audio)
    }

    /// Translate for every target language concurrently, deliver, then echo.
    async fn fan_out(&self, sender: &str, utterance: &Utterance<'_>) {
        let targets: Vec<String> = self
            .services
            .rooms
            .target_languages(utterance.room_id, sender)
            .into_iter()
            .filter(|language| language != utterance.source_language)
            .collect();

        debug!(
            sender = %sender,
            room_id = %utterance.room_id,
            targets = ?targets,
            "Fanning out utterance"
        );

        let results = join_all(
            targets
                .iter()
                .map(|target| self.deliver_to_language(sender, utterance, target)),
        )
        .await;

        for (target, result) in targets.iter().zip(results) {
            if let Err(err) = result {
                self.counters.target_failures.fetch_add(1, Ordering::Relaxed);
                warn!(sender = %sender, target = %target, error = %err, "Delivery to language group failed");
                self.report(sender, &err);
            }
        }

        self.sink.deliver(
            sender,
            OutboundEvent::Transcription(Transcription {
                text: utterance.text.to_string(),
                language: utterance.source_language.to_string(),
            }),
        );
    }

    /// Translate (and maybe synthesize) for one language group and deliver.
    ///
    /// If only speech synthesis fails, the group still receives the text.
    async fn deliver_to_language(
        &self,
        sender: &str,
        utterance: &Utterance<'_>,
        target: &str,
    ) -> Result<(), RelayError> {
        let translated = self
            .translate_cached(utterance.text, utterance.source_language, target)
            .await?;

        let text_event = || {
            OutboundEvent::TranslatedText(TranslatedText {
                original_text: utterance.text.to_string(),
                translated_text: translated.clone(),
                source_language: utterance.source_language.to_string(),
                target_language: target.to_string(),
            })
        };

        let (event, synthesis_error) = if utterance.with_audio {
            match self.services.providers.tts.synthesize(&translated, target).await {
                Ok(audio) => (
                    OutboundEvent::TranslatedAudio(TranslatedAudio {
                        original_text: utterance.text.to_string(),
                        translated_text: translated.clone(),
                        audio_data: BASE64.encode(audio),
                        source_language: utterance.source_language.to_string(),
                        target_language: target.to_string(),
                    }),
                    None,
                ),
                Err(err) => (text_event(), Some(err)),
            }
        } else {
            (text_event(), None)
        };

        // Recipients are resolved after the provider calls so that members who
        // left in the meantime are not targeted
        for recipient in self.services.rooms.members_speaking(utterance.room_id, target) {
            if recipient == sender {
                continue;
            }
            self.sink.deliver(&recipient, event.clone());
            self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
        }

        match synthesis_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn translate_cached(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, RelayError> {
        if let Some(cached) = self.services.cache.get(text, source_language, target_language) {
            debug!(from = %source_language, to = %target_language, "Using cached translation");
            return Ok(cached);
        }

        let translation = self
            .services
            .providers
            .translation
            .translate(text, source_language, target_language)
            .await?;
        self.services
            .cache
            .put(text, source_language, target_language, translation.clone());
        Ok(translation)
    }

    /// Send an error to the originating connection only.
    fn report(&self, connection_id: &str, err: &RelayError) {
        match err {
            RelayError::RateLimitExceeded => {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            RelayError::InvalidInput(_) => {
                self.counters.invalid_input.fetch_add(1, Ordering::Relaxed);
            }
            RelayError::ServiceUnavailable { .. } => {}
        }
        debug!(connection_id = %connection_id, error = %err, "Reporting error to sender");
        self.sink
            .deliver(connection_id, OutboundEvent::error(err.code(), err.user_message()));
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_room_count: self.services.rooms.room_count(),
            total_member_count: self.services.rooms.member_count(),
            cache_size: self.services.cache.len(),
            offline_mode: self.services.providers.is_offline(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let rooms = self.services.rooms.summaries();
        StatsSnapshot {
            total_rooms: rooms.len(),
            rooms,
            cache_size: self.services.cache.len(),
        }
    }
}

/// Trimmed value of a required field, or `InvalidInput` naming the field.
fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, RelayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RelayError::InvalidInput(format!("Missing required field: {}", field)))
    } else {
        Ok(trimmed)
    }
}
