//! Reshape the provider payload into the Piped-style public schema
//!
//! Only audio formats survive. Each becomes a `NormalizedStream` with a
//! "N kbps" label derived from its bitrate, sorted highest bitrate first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NormalizerConfig;
use crate::error::ApiError;

/// Label forced onto the top stream by `relabel_top_stream`.
pub const TOP_STREAM_LABEL: &str = "320 kbps";

/// Bytes added to the top stream's content length by `relabel_top_stream`.
pub const TOP_STREAM_PADDING_BYTES: u64 = 2 * 1024 * 1024;

/// Provider payload. Every field is optional; absent metadata falls back to
/// placeholder values, absent `adaptiveFormats` is an error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel_title: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Seconds, sent as a string by the provider
    #[serde(default)]
    pub length_seconds: Option<Value>,
    #[serde(default)]
    pub adaptive_formats: Option<Vec<AdaptiveFormat>>,
}

/// One candidate media stream.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFormat {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Bits per second
    #[serde(default)]
    pub bitrate: Option<Value>,
    /// Bytes, usually sent as a string
    #[serde(default)]
    pub content_length: Option<Value>,
    #[serde(default)]
    pub audio_quality: Option<String>,
}

/// One audio variant in the public schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedStream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub quality: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    pub bitrate: u64,
    pub content_length: Option<u64>,
    pub audio_quality: String,
}

/// Public response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedStreams {
    pub title: String,
    pub uploader: String,
    pub uploader_url: String,
    pub duration: u64,
    #[serde(rename = "About", skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    pub audio_streams: Vec<NormalizedStream>,
    pub video_streams: Vec<Value>,
    pub related_streams: Vec<Value>,
    pub subtitles: Vec<Value>,
    pub livestream: bool,
}

/// Leading-digit integer parse over JSON numbers and numeric strings:
/// `"1000"` → 1000, `"213.5"` → 213, `12.9` → 12, `"abc"` → None.
fn as_integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Value::String(s) => {
            let digits: String = s
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Text between `codecs="` and the next `"` (or end of string).
fn extract_codec(mime_type: &str) -> Option<String> {
    let (_, rest) = mime_type.split_once("codecs=\"")?;
    let codec = rest.split('"').next().unwrap_or(rest);
    Some(codec.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Keep audio formats, map them to the public shape, sort by bitrate descending.
pub fn extract_audio_streams(formats: Vec<AdaptiveFormat>) -> Vec<NormalizedStream> {
    let mut streams: Vec<NormalizedStream> = formats
        .into_iter()
        .filter_map(|f| {
            let mime_type = f.mime_type?;
            if !mime_type.starts_with("audio") {
                return None;
            }
            let bitrate = f.bitrate.as_ref().and_then(as_integer).unwrap_or(0);
            Some(NormalizedStream {
                url: f.url,
                quality: format!("{} kbps", bitrate / 1000),
                codec: extract_codec(&mime_type),
                mime_type,
                bitrate,
                content_length: f.content_length.as_ref().and_then(as_integer),
                audio_quality: non_empty(f.audio_quality).unwrap_or_else(|| "Unknown".to_string()),
            })
        })
        .collect();

    streams.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));
    streams
}

/// Provider-specific correction: the top stream is mislabeled upstream, so
/// force its label to "320 kbps" and pad its content length by 2 MiB.
/// Expects `streams` sorted highest bitrate first.
pub fn relabel_top_stream(streams: &mut [NormalizedStream]) {
    if let Some(top) = streams.first_mut() {
        top.quality = TOP_STREAM_LABEL.to_string();
        if let Some(len) = top.content_length.as_mut() {
            *len = len.saturating_add(TOP_STREAM_PADDING_BYTES);
        }
    }
}

/// Build the public response from a provider payload.
pub fn normalize(
    payload: StreamPayload,
    options: &NormalizerConfig,
) -> Result<PipedStreams, ApiError> {
    let formats = payload.adaptive_formats.ok_or(ApiError::NoStreamingData)?;

    let mut audio_streams = extract_audio_streams(formats);
    if options.relabel_top_stream {
        relabel_top_stream(&mut audio_streams);
    }

    let channel_id = non_empty(payload.channel_id).unwrap_or_else(|| "unknown".to_string());

    Ok(PipedStreams {
        title: non_empty(payload.title).unwrap_or_else(|| "Unknown Title".to_string()),
        uploader: non_empty(payload.channel_title).unwrap_or_else(|| "Unknown Channel".to_string()),
        uploader_url: format!("/channel/{channel_id}"),
        duration: payload
            .length_seconds
            .as_ref()
            .and_then(as_integer)
            .unwrap_or(0),
        about: options.about.clone(),
        audio_streams,
        video_streams: Vec::new(),
        related_streams: Vec::new(),
        subtitles: Vec::new(),
        livestream: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formats(value: Value) -> Vec<AdaptiveFormat> {
        serde_json::from_value(value).unwrap()
    }

    fn audio(bitrate: u64) -> Value {
        json!({ "mimeType": "audio/webm; codecs=\"opus\"", "bitrate": bitrate })
    }

    #[test]
    fn filters_video_and_maps_audio_fields() {
        let streams = extract_audio_streams(formats(json!([
            {
                "url": "https://rr1.example/audio",
                "mimeType": "audio/mp4;codecs=\"mp4a.40.2\"",
                "bitrate": 128000,
                "contentLength": "1000000"
            },
            { "mimeType": "video/mp4", "bitrate": 500000 }
        ])));

        assert_eq!(streams.len(), 1);
        let s = &streams[0];
        assert_eq!(s.quality, "128 kbps");
        assert_eq!(s.codec.as_deref(), Some("mp4a.40.2"));
        assert_eq!(s.content_length, Some(1_000_000));
        assert_eq!(s.bitrate, 128000);
        assert_eq!(s.audio_quality, "Unknown");
        assert_eq!(s.url.as_deref(), Some("https://rr1.example/audio"));
    }

    #[test]
    fn sorts_by_bitrate_descending() {
        let streams = extract_audio_streams(formats(json!([
            audio(64000),
            audio(320000),
            audio(128000)
        ])));
        let bitrates: Vec<u64> = streams.iter().map(|s| s.bitrate).collect();
        assert_eq!(bitrates, vec![320000, 128000, 64000]);
    }

    #[test]
    fn quality_label_floors_bitrate() {
        let streams = extract_audio_streams(formats(json!([audio(129_999), audio(999)])));
        assert_eq!(streams[0].quality, "129 kbps");
        assert_eq!(streams[1].quality, "0 kbps");
    }

    #[test]
    fn codec_absent_without_marker() {
        let streams =
            extract_audio_streams(formats(json!([{ "mimeType": "audio/mp4", "bitrate": 1 }])));
        assert_eq!(streams[0].codec, None);
    }

    #[test]
    fn codec_without_closing_quote_takes_rest() {
        assert_eq!(extract_codec("audio/webm; codecs=\"opus").as_deref(), Some("opus"));
    }

    #[test]
    fn keeps_audio_quality_and_numeric_content_length() {
        let streams = extract_audio_streams(formats(json!([{
            "mimeType": "audio/webm",
            "bitrate": 160000,
            "contentLength": 4242,
            "audioQuality": "AUDIO_QUALITY_MEDIUM"
        }])));
        assert_eq!(streams[0].audio_quality, "AUDIO_QUALITY_MEDIUM");
        assert_eq!(streams[0].content_length, Some(4242));
    }

    #[test]
    fn unparseable_content_length_is_absent() {
        let streams = extract_audio_streams(formats(json!([{
            "mimeType": "audio/webm",
            "bitrate": 1000,
            "contentLength": "unknown"
        }])));
        assert_eq!(streams[0].content_length, None);
    }

    #[test]
    fn formats_without_mime_type_are_dropped() {
        let streams = extract_audio_streams(formats(json!([{ "bitrate": 1000 }, audio(2000)])));
        assert_eq!(streams.len(), 1);
    }

    fn two_audio_formats() -> StreamPayload {
        StreamPayload {
            adaptive_formats: Some(formats(json!([
                { "mimeType": "audio/webm", "bitrate": 160000, "contentLength": "3000000" },
                { "mimeType": "audio/mp4", "bitrate": 128000, "contentLength": "2000000" }
            ]))),
            ..StreamPayload::default()
        }
    }

    #[test]
    fn relabel_top_stream_is_opt_in() {
        let plain = normalize(two_audio_formats(), &NormalizerConfig::default()).unwrap();
        assert_eq!(plain.audio_streams[0].quality, "160 kbps");
        assert_eq!(plain.audio_streams[0].content_length, Some(3_000_000));

        let options = NormalizerConfig {
            relabel_top_stream: true,
            about: None,
        };
        let relabeled = normalize(two_audio_formats(), &options).unwrap();
        assert_eq!(relabeled.audio_streams[0].quality, TOP_STREAM_LABEL);
        assert_eq!(
            relabeled.audio_streams[0].content_length,
            Some(3_000_000 + TOP_STREAM_PADDING_BYTES)
        );
        // Only the top entry changes.
        assert_eq!(relabeled.audio_streams[1].quality, "128 kbps");
        assert_eq!(relabeled.audio_streams[1].content_length, Some(2_000_000));
    }

    #[test]
    fn relabel_without_content_length_only_changes_label() {
        let mut streams = extract_audio_streams(formats(json!([audio(96000)])));
        relabel_top_stream(&mut streams);
        assert_eq!(streams[0].quality, TOP_STREAM_LABEL);
        assert_eq!(streams[0].content_length, None);

        let mut empty: Vec<NormalizedStream> = Vec::new();
        relabel_top_stream(&mut empty);
    }

    #[test]
    fn relabel_padding_saturates_near_u64_max() {
        let payload: StreamPayload = serde_json::from_value(json!({
            "adaptiveFormats": [{
                "mimeType": "audio/webm",
                "bitrate": 160000,
                "contentLength": "18446744073709551000"
            }]
        }))
        .unwrap();
        let options = NormalizerConfig {
            relabel_top_stream: true,
            about: None,
        };
        let streams = normalize(payload, &options).unwrap();
        assert_eq!(streams.audio_streams[0].quality, TOP_STREAM_LABEL);
        assert_eq!(streams.audio_streams[0].content_length, Some(u64::MAX));
    }

    #[test]
    fn missing_adaptive_formats_is_no_streaming_data() {
        let err = normalize(StreamPayload::default(), &NormalizerConfig::default()).unwrap_err();
        assert!(matches!(err, ApiError::NoStreamingData));
    }

    #[test]
    fn metadata_defaults() {
        let payload = StreamPayload {
            title: Some(String::new()),
            adaptive_formats: Some(Vec::new()),
            ..StreamPayload::default()
        };
        let out = normalize(payload, &NormalizerConfig::default()).unwrap();
        assert_eq!(out.title, "Unknown Title");
        assert_eq!(out.uploader, "Unknown Channel");
        assert_eq!(out.uploader_url, "/channel/unknown");
        assert_eq!(out.duration, 0);
        assert!(out.audio_streams.is_empty());
        assert!(!out.livestream);
    }

    #[test]
    fn metadata_and_schema_shape() {
        let payload: StreamPayload = serde_json::from_value(json!({
            "title": "Song",
            "channelTitle": "Artist",
            "channelId": "UC123",
            "lengthSeconds": "213",
            "adaptiveFormats": [audio(128000)]
        }))
        .unwrap();
        let options = NormalizerConfig {
            relabel_top_stream: false,
            about: Some("Provided by ytify".into()),
        };
        let body = serde_json::to_value(normalize(payload, &options).unwrap()).unwrap();

        assert_eq!(body["title"], "Song");
        assert_eq!(body["uploader"], "Artist");
        assert_eq!(body["uploaderUrl"], "/channel/UC123");
        assert_eq!(body["duration"], 213);
        assert_eq!(body["About"], "Provided by ytify");
        assert_eq!(body["audioStreams"][0]["mimeType"], "audio/webm; codecs=\"opus\"");
        assert_eq!(body["audioStreams"][0]["codec"], "opus");
        assert!(body["audioStreams"][0]["contentLength"].is_null());
        assert_eq!(body["videoStreams"], json!([]));
        assert_eq!(body["relatedStreams"], json!([]));
        assert_eq!(body["subtitles"], json!([]));
        assert_eq!(body["livestream"], false);
    }

    #[test]
    fn about_is_omitted_when_unset() {
        let payload = StreamPayload {
            adaptive_formats: Some(Vec::new()),
            ..StreamPayload::default()
        };
        let body =
            serde_json::to_value(normalize(payload, &NormalizerConfig::default()).unwrap())
                .unwrap();
        assert!(body.get("About").is_none());
    }

    #[test]
    fn as_integer_follows_leading_digits() {
        assert_eq!(as_integer(&json!("1000")), Some(1000));
        assert_eq!(as_integer(&json!("213.7")), Some(213));
        assert_eq!(as_integer(&json!(12.9)), Some(12));
        assert_eq!(as_integer(&json!("abc")), None);
        assert_eq!(as_integer(&json!(-5)), None);
        assert_eq!(as_integer(&json!(null)), None);
    }
}
