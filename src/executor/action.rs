use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use crate::agent_engine::history::IMAGE_REDACTED;
use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::executor::handle::{Coordinate, ScrollDirection, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::executor::sessions::DesktopSessions;
use crate::perception::observation::ObservationExtractor;

/// Upper bound on a single wait, whatever duration the model asks for.
pub const DEFAULT_MAX_WAIT_SECS: f64 = 2.0;
/// Hard ceiling for a configured wait limit.
const MAX_WAIT_CEILING_SECS: f64 = 3600.0;

/// Raw `computer` tool arguments as the model sends them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default, deserialize_with = "integral_pair")]
    pub coordinate: Option<(i32, i32)>,
    #[serde(default, deserialize_with = "integral_pair")]
    pub start_coordinate: Option<(i32, i32)>,
    pub text: Option<String>,
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "integral_amount")]
    pub scroll_amount: Option<i64>,
    pub scroll_direction: Option<String>,
}

/// Action tags the `computer` tool accepts.
pub const ACTIONS: [&str; 10] = [
    "screenshot",
    "wait",
    "left_click",
    "double_click",
    "right_click",
    "mouse_move",
    "type",
    "key",
    "scroll",
    "left_click_drag",
];

/// Models often send `512.0` for `512`; whole floats are accepted.
fn integral(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64).then_some(v as i64)
}

fn integral_pair<'de, D>(deserializer: D) -> Result<Option<(i32, i32)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some((x, y)) = Option::<(f64, f64)>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let component = |v: f64| {
        integral(v)
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer coordinate, got {v}")))
    };
    Ok(Some((component(x)?, component(y)?)))
}

fn integral_amount<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(v) => integral(v)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer amount, got {v}"))),
    }
}

/// A validated desktop action; each variant carries exactly what it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputerAction {
    Screenshot,
    Wait { seconds: f64 },
    LeftClick { at: Coordinate },
    DoubleClick { at: Coordinate },
    RightClick { at: Coordinate },
    MouseMove { to: Coordinate },
    Type { text: String },
    Key { key: String },
    Scroll { direction: ScrollDirection, amount: u32 },
    LeftClickDrag { from: Coordinate, to: Coordinate },
}

impl ComputerAction {
    /// Validates `computer` tool arguments. Fails before any desktop is touched.
    ///
    /// The tag is checked first: an unknown action is unsupported whatever else
    /// the arguments hold.
    pub fn from_args(args: &serde_json::Value) -> DeskAgentResult<Self> {
        match args.get("action") {
            Some(serde_json::Value::String(tag)) if !tag.is_empty() && !ACTIONS.contains(&tag.as_str()) => {
                return Err(DeskAgentError::UnsupportedAction(tag.clone()));
            }
            _ => {}
        }
        let request: ActionRequest = serde_json::from_value(args.clone())
            .map_err(|e| DeskAgentError::Validation(format!("Invalid computer arguments: {e}")))?;
        Self::try_from(request)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Wait { .. } => "wait",
            Self::LeftClick { .. } => "left_click",
            Self::DoubleClick { .. } => "double_click",
            Self::RightClick { .. } => "right_click",
            Self::MouseMove { .. } => "mouse_move",
            Self::Type { .. } => "type",
            Self::Key { .. } => "key",
            Self::Scroll { .. } => "scroll",
            Self::LeftClickDrag { .. } => "left_click_drag",
        }
    }
}

impl TryFrom<ActionRequest> for ComputerAction {
    type Error = DeskAgentError;

    fn try_from(req: ActionRequest) -> DeskAgentResult<Self> {
        let coordinate = |label: &str| {
            req.coordinate
                .map(Coordinate::from)
                .ok_or_else(|| DeskAgentError::missing("Coordinate", label))
        };
        // An empty string is as good as no text at all.
        let text = |field: &str, label: &str| {
            req.text
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| DeskAgentError::missing(field, label))
        };

        let action = match req.action.as_str() {
            "screenshot" => Self::Screenshot,
            "wait" => {
                let seconds = req
                    .duration
                    .filter(|d| *d != 0.0 && !d.is_nan())
                    .ok_or_else(|| DeskAgentError::missing("Duration", "wait"))?;
                Self::Wait { seconds }
            }
            "left_click" => Self::LeftClick {
                at: coordinate("left click")?,
            },
            "double_click" => Self::DoubleClick {
                at: coordinate("double click")?,
            },
            "right_click" => Self::RightClick {
                at: coordinate("right click")?,
            },
            "mouse_move" => Self::MouseMove {
                to: coordinate("mouse move")?,
            },
            "type" => Self::Type {
                text: text("Text", "type")?,
            },
            "key" => Self::Key {
                key: text("Key", "key")?,
            },
            "scroll" => {
                let direction = match req.scroll_direction.as_deref() {
                    Some("up") => ScrollDirection::Up,
                    Some("down") => ScrollDirection::Down,
                    Some(other) => {
                        return Err(DeskAgentError::Validation(format!(
                            "Scroll direction must be up or down, got '{other}'"
                        )))
                    }
                    None => return Err(DeskAgentError::missing("Scroll direction", "scroll")),
                };
                let amount = match req.scroll_amount {
                    None | Some(0) => return Err(DeskAgentError::missing("Scroll amount", "scroll")),
                    Some(n) => u32::try_from(n).map_err(|_| {
                        DeskAgentError::Validation(format!(
                            "Scroll amount must be a positive integer, got {n}"
                        ))
                    })?,
                };
                Self::Scroll { direction, amount }
            }
            "left_click_drag" => match (req.start_coordinate, req.coordinate) {
                (Some(from), Some(to)) => Self::LeftClickDrag {
                    from: from.into(),
                    to: to.into(),
                },
                _ => return Err(DeskAgentError::missing("Coordinates", "left click drag")),
            },
            "" => return Err(DeskAgentError::missing("Action", "computer")),
            other => return Err(DeskAgentError::UnsupportedAction(other.to_string())),
        };
        Ok(action)
    }
}

/// What a screenshot yields: pixels for display, text for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageObservation {
    /// Base64-encoded image bytes.
    pub data: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    Text(String),
    Image(ImageObservation),
}

impl ActionOutput {
    /// The form stored in the transcript (and shown to the user).
    pub fn to_transcript(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Image(img) => serde_json::json!({
                "type": "image",
                "data": img.data,
                "observation": img.observation,
            }),
        }
    }

    /// The only form the driving model reads. Pixels never pass through here.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image(img) => observation_text(&img.observation),
        }
    }
}

fn observation_text(observation: &str) -> String {
    format!("SCREENSHOT OCR ({SCREEN_WIDTH}x{SCREEN_HEIGHT}):\n{observation}")
}

/// Model-facing text for a tool result read back from a transcript.
///
/// Image payloads are reduced to their observation (older results may store it as
/// `ocr`), or to the redaction notice when they carry none.
pub fn result_to_model_text(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("type").and_then(|t| t.as_str()) {
            Some("image") => map
                .get("observation")
                .or_else(|| map.get("ocr"))
                .and_then(|o| o.as_str())
                .map(observation_text)
                .unwrap_or_else(|| IMAGE_REDACTED.to_string()),
            Some("text") => map
                .get("text")
                .and_then(|t| t.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| result.to_string()),
            _ => result.to_string(),
        },
        other => other.to_string(),
    }
}

/// The literal key name models use for Enter is translated for the desktop.
fn platform_key(key: &str) -> &str {
    if key == "Return" {
        "enter"
    } else {
        key
    }
}

/// Executes validated actions against a session's desktop.
pub struct ActionDispatcher {
    sessions: Arc<DesktopSessions>,
    observer: ObservationExtractor,
    max_wait: f64,
}

impl ActionDispatcher {
    pub fn new(sessions: Arc<DesktopSessions>, observer: ObservationExtractor) -> Self {
        Self {
            sessions,
            observer,
            max_wait: DEFAULT_MAX_WAIT_SECS,
        }
    }

    /// Non-finite or negative limits fall back to [`DEFAULT_MAX_WAIT_SECS`].
    pub fn with_max_wait(mut self, seconds: f64) -> Self {
        self.max_wait = if seconds.is_finite() && seconds >= 0.0 {
            seconds.min(MAX_WAIT_CEILING_SECS)
        } else {
            tracing::warn!(seconds, "invalid max wait, using default");
            DEFAULT_MAX_WAIT_SECS
        };
        self
    }

    /// Validates raw tool arguments, then dispatches.
    pub async fn dispatch_args(
        &self,
        session_id: &str,
        args: &serde_json::Value,
    ) -> DeskAgentResult<ActionOutput> {
        let action = ComputerAction::from_args(args)?;
        self.dispatch(session_id, action).await
    }

    pub async fn dispatch(
        &self,
        session_id: &str,
        action: ComputerAction,
    ) -> DeskAgentResult<ActionOutput> {
        let lease = self.sessions.acquire(session_id).await?;
        let desktop = lease.handle.as_ref();
        tracing::info!(session = %session_id, action = ?action, "dispatching action");

        let text = match action {
            ComputerAction::Screenshot => {
                let bytes = desktop.screenshot().await?;
                let observation = self.observer.extract(&bytes).await;
                tracing::info!(
                    session = %session_id,
                    bytes = bytes.len(),
                    observation_chars = observation.len(),
                    "screenshot captured"
                );
                return Ok(ActionOutput::Image(ImageObservation {
                    data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                    observation,
                }));
            }
            ComputerAction::Wait { seconds } => {
                let actual = seconds.clamp(0.0, self.max_wait);
                tokio::time::sleep(Duration::from_secs_f64(actual)).await;
                format!("Waited for {actual} seconds")
            }
            ComputerAction::LeftClick { at } => {
                desktop.move_mouse(at.x, at.y).await?;
                desktop.left_click().await?;
                format!("Left clicked at {at}")
            }
            ComputerAction::DoubleClick { at } => {
                desktop.move_mouse(at.x, at.y).await?;
                desktop.double_click().await?;
                format!("Double clicked at {at}")
            }
            ComputerAction::RightClick { at } => {
                desktop.move_mouse(at.x, at.y).await?;
                desktop.right_click().await?;
                format!("Right clicked at {at}")
            }
            ComputerAction::MouseMove { to } => {
                desktop.move_mouse(to.x, to.y).await?;
                format!("Moved mouse to {to}")
            }
            ComputerAction::Type { text } => {
                desktop.write(&text).await?;
                format!("Typed: {text}")
            }
            ComputerAction::Key { key } => {
                desktop.press(platform_key(&key)).await?;
                format!("Pressed key: {key}")
            }
            ComputerAction::Scroll { direction, amount } => {
                desktop.scroll(direction, amount).await?;
                format!("Scrolled {direction} by {amount}")
            }
            ComputerAction::LeftClickDrag { from, to } => {
                desktop.drag(from, to).await?;
                format!("Dragged mouse from {from} to {to}")
            }
        };
        Ok(ActionOutput::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::executor::handle::testing::{FakeResolver, TINY_PNG};
    use crate::perception::observation::tests::{vision_cfg, FakeVision};
    use crate::perception::observation::{OCR_DISABLED, OCR_FAILED};

    fn dispatcher_with(resolver: Arc<FakeResolver>, observer: ObservationExtractor) -> ActionDispatcher {
        ActionDispatcher::new(Arc::new(DesktopSessions::new(resolver)), observer)
    }

    fn dispatcher() -> (Arc<FakeResolver>, ActionDispatcher) {
        let resolver = Arc::new(FakeResolver::new());
        let d = dispatcher_with(resolver.clone(), ObservationExtractor::disabled());
        (resolver, d)
    }

    #[tokio::test]
    async fn missing_required_fields_never_reach_the_desktop() {
        let (resolver, d) = dispatcher();
        let cases = [
            (json!({ "action": "wait" }), "Duration required for wait action"),
            (json!({ "action": "left_click" }), "Coordinate required for left click action"),
            (json!({ "action": "double_click" }), "Coordinate required for double click action"),
            (json!({ "action": "right_click" }), "Coordinate required for right click action"),
            (json!({ "action": "mouse_move" }), "Coordinate required for mouse move action"),
            (json!({ "action": "type" }), "Text required for type action"),
            (json!({ "action": "type", "text": "" }), "Text required for type action"),
            (json!({ "action": "key" }), "Key required for key action"),
            (
                json!({ "action": "scroll", "scroll_amount": 3 }),
                "Scroll direction required for scroll action",
            ),
            (
                json!({ "action": "scroll", "scroll_direction": "down" }),
                "Scroll amount required for scroll action",
            ),
            (
                json!({ "action": "left_click_drag", "coordinate": [10, 10] }),
                "Coordinates required for left click drag action",
            ),
        ];
        for (args, expected) in cases {
            match d.dispatch_args("sbx", &args).await {
                Err(DeskAgentError::Validation(msg)) => assert_eq!(msg, expected, "{args}"),
                other => panic!("{args}: expected validation error, got {other:?}"),
            }
        }
        assert_eq!(resolver.resolve_count(), 0);
        assert!(resolver.desktop.calls().is_empty());
    }

    #[tokio::test]
    async fn unsupported_action_is_rejected_whatever_the_arguments() {
        let (resolver, d) = dispatcher();
        let cases = [
            json!({ "action": "zoom", "coordinate": [1, 2], "text": "x", "duration": 1 }),
            json!({ "action": "zoom", "text": 5 }),
            json!({ "action": "zoom", "coordinate": "100,200", "scroll_amount": "lots" }),
            json!({ "action": "zoom", "duration": "soon", "scroll_direction": 1 }),
        ];
        for args in cases {
            let err = d.dispatch_args("sbx", &args).await.unwrap_err();
            assert!(
                matches!(err, DeskAgentError::UnsupportedAction(ref a) if a == "zoom"),
                "{args}: {err:?}"
            );
        }
        assert_eq!(resolver.resolve_count(), 0);
    }

    #[test]
    fn whole_floats_are_accepted_as_integers() {
        assert_eq!(
            ComputerAction::from_args(&json!({ "action": "left_click", "coordinate": [512.0, 384.0] }))
                .unwrap(),
            ComputerAction::LeftClick {
                at: Coordinate::new(512, 384)
            }
        );
        assert_eq!(
            ComputerAction::from_args(
                &json!({ "action": "scroll", "scroll_direction": "down", "scroll_amount": 3.0 })
            )
            .unwrap(),
            ComputerAction::Scroll {
                direction: ScrollDirection::Down,
                amount: 3
            }
        );
        for args in [
            json!({ "action": "left_click", "coordinate": [512.5, 384] }),
            json!({ "action": "scroll", "scroll_direction": "up", "scroll_amount": 2.5 }),
            json!({ "action": "mouse_move", "coordinate": [1e12, 0] }),
        ] {
            assert!(
                matches!(ComputerAction::from_args(&args), Err(DeskAgentError::Validation(_))),
                "{args}"
            );
        }
    }

    #[tokio::test]
    async fn malformed_coordinate_is_a_validation_error() {
        let (_, d) = dispatcher();
        let args = json!({ "action": "left_click", "coordinate": "100,200" });
        assert!(matches!(
            d.dispatch_args("sbx", &args).await,
            Err(DeskAgentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clicks_move_before_clicking() {
        let (resolver, d) = dispatcher();
        let out = d
            .dispatch_args("sbx", &json!({ "action": "left_click", "coordinate": [512, 384] }))
            .await
            .unwrap();
        assert_eq!(out, ActionOutput::Text("Left clicked at 512, 384".into()));

        d.dispatch_args("sbx", &json!({ "action": "double_click", "coordinate": [5, 6] }))
            .await
            .unwrap();
        d.dispatch_args("sbx", &json!({ "action": "right_click", "coordinate": [7, 8] }))
            .await
            .unwrap();

        assert_eq!(
            resolver.desktop.calls(),
            [
                "move_mouse 512 384",
                "left_click",
                "move_mouse 5 6",
                "double_click",
                "move_mouse 7 8",
                "right_click",
            ]
        );
    }

    #[tokio::test]
    async fn pointer_keyboard_and_scroll_results() {
        let (resolver, d) = dispatcher();
        let d = &d;
        let run = move |args: serde_json::Value| async move {
            d.dispatch_args("sbx", &args).await.unwrap().to_model_text()
        };

        assert_eq!(run(json!({ "action": "mouse_move", "coordinate": [3, 4] })).await, "Moved mouse to 3, 4");
        assert_eq!(run(json!({ "action": "type", "text": "hello world" })).await, "Typed: hello world");
        assert_eq!(
            run(json!({ "action": "scroll", "scroll_direction": "up", "scroll_amount": 5 })).await,
            "Scrolled up by 5"
        );
        assert_eq!(
            run(json!({ "action": "left_click_drag", "start_coordinate": [1, 2], "coordinate": [30, 40] })).await,
            "Dragged mouse from 1, 2 to 30, 40"
        );
        assert_eq!(
            resolver.desktop.calls(),
            [
                "move_mouse 3 4",
                "write hello world",
                "scroll up 5",
                "drag 1 2 -> 30 40",
            ]
        );
    }

    #[tokio::test]
    async fn return_key_is_pressed_as_enter() {
        let (resolver, d) = dispatcher();
        let out = d
            .dispatch_args("sbx", &json!({ "action": "key", "text": "Return" }))
            .await
            .unwrap();
        assert_eq!(out.to_model_text(), "Pressed key: Return");
        d.dispatch_args("sbx", &json!({ "action": "key", "text": "ctrl+l" }))
            .await
            .unwrap();
        assert_eq!(resolver.desktop.calls(), ["press enter", "press ctrl+l"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_clamped_to_two_seconds() {
        let (_, d) = dispatcher();
        let started = tokio::time::Instant::now();
        let out = d
            .dispatch_args("sbx", &json!({ "action": "wait", "duration": 10 }))
            .await
            .unwrap();
        assert_eq!(out.to_model_text(), "Waited for 2 seconds");
        assert!(started.elapsed() <= Duration::from_secs(2) + Duration::from_millis(10));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unusable_wait_limit_falls_back_to_default() {
        for limit in [f64::INFINITY, f64::NAN, -1.0] {
            let (resolver, _) = dispatcher();
            let d = dispatcher_with(resolver, ObservationExtractor::disabled()).with_max_wait(limit);
            let out = d
                .dispatch_args("sbx", &json!({ "action": "wait", "duration": 10 }))
                .await
                .unwrap();
            assert_eq!(out.to_model_text(), "Waited for 2 seconds");
        }
        let (resolver, _) = dispatcher();
        let d = dispatcher_with(resolver, ObservationExtractor::disabled()).with_max_wait(1e300);
        let out = d
            .dispatch_args("sbx", &json!({ "action": "wait", "duration": 5 }))
            .await
            .unwrap();
        assert_eq!(out.to_model_text(), "Waited for 5 seconds");
    }

    #[tokio::test(start_paused = true)]
    async fn short_wait_is_honoured() {
        let (_, d) = dispatcher();
        let out = d
            .dispatch_args("sbx", &json!({ "action": "wait", "duration": 0.5 }))
            .await
            .unwrap();
        assert_eq!(out.to_model_text(), "Waited for 0.5 seconds");
    }

    #[tokio::test]
    async fn screenshot_with_working_ocr() {
        let resolver = Arc::new(FakeResolver::new());
        let d = dispatcher_with(
            resolver.clone(),
            ObservationExtractor::new(FakeVision::answering("Terminal window"), vision_cfg()),
        );
        let out = d.dispatch("sbx", ComputerAction::Screenshot).await.unwrap();
        let ActionOutput::Image(img) = &out else {
            panic!("screenshot must yield an image observation");
        };
        assert_eq!(img.observation, "Terminal window");
        assert_eq!(
            base64::engine::general_purpose::STANDARD.decode(&img.data).unwrap(),
            TINY_PNG
        );
        assert_eq!(out.to_model_text(), "SCREENSHOT OCR (1024x768):\nTerminal window");
        assert_eq!(out.to_transcript()["type"], "image");
    }

    #[tokio::test]
    async fn screenshot_survives_missing_or_failing_ocr() {
        let (_, disabled) = dispatcher();
        let out = disabled.dispatch("sbx", ComputerAction::Screenshot).await.unwrap();
        assert!(matches!(out, ActionOutput::Image(ref img) if img.observation == OCR_DISABLED));

        let failing = dispatcher_with(
            Arc::new(FakeResolver::new()),
            ObservationExtractor::new(FakeVision::failing(), vision_cfg()),
        );
        let out = failing.dispatch("sbx", ComputerAction::Screenshot).await.unwrap();
        assert!(matches!(out, ActionOutput::Image(ref img) if img.observation == OCR_FAILED));
    }

    #[tokio::test]
    async fn unreachable_desktop_fails_valid_actions() {
        let d = dispatcher_with(
            Arc::new(FakeResolver::unavailable()),
            ObservationExtractor::disabled(),
        );
        let err = d.dispatch("sbx", ComputerAction::Screenshot).await.unwrap_err();
        assert!(err.is_fatal_for_session());
    }

    #[test]
    fn transcript_results_are_reduced_to_text_for_the_model() {
        assert_eq!(result_to_model_text(&json!("Typed: hi")), "Typed: hi");
        assert_eq!(
            result_to_model_text(&json!({ "type": "image", "data": "AAAA", "ocr": "Login form" })),
            "SCREENSHOT OCR (1024x768):\nLogin form"
        );
        assert_eq!(
            result_to_model_text(&json!({ "type": "image", "data": "AAAA" })),
            IMAGE_REDACTED
        );
        assert_eq!(
            result_to_model_text(&json!({ "type": "text", "text": "Image redacted" })),
            "Image redacted"
        );
        assert_eq!(result_to_model_text(&json!({ "ok": true })), r#"{"ok":true}"#);
    }
}
