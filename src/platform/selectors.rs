//! Per-platform candidate tables.
//!
//! Every list is ordered: the most reliable selector comes first and generic
//! fallbacks come last. Meeting UIs change without notice, so each table
//! carries English and Portuguese variants side by side.

use crate::admission::AdmissionIndicators;
use crate::browser::{css, has_text, text_contains, text_is, xpath, Selector};

#[derive(Debug, Clone, Copy)]
pub struct PlatformSelectors {
    /// Interstitials to click through before the pre-join screen
    pub pre_join: &'static [Selector],
    pub name_input: &'static [Selector],
    pub camera: &'static [Selector],
    /// Lowercase label fragments meaning the camera is already off
    pub camera_off_labels: &'static [&'static str],
    pub join: &'static [Selector],
    /// Button texts for the in-page fallback click
    pub join_labels: &'static [&'static str],
    pub admission: AdmissionIndicators,
    pub leave: &'static [Selector],
    pub leave_confirm: &'static [Selector],
}

pub static GOOGLE_MEET: PlatformSelectors = PlatformSelectors {
    pre_join: &[],
    name_input: &[
        css(r#"input[type="text"][aria-label*="name"]"#),
        css(r#"input[type="text"][aria-label*="Name"]"#),
        css(r#"input[placeholder*="name"]"#),
        css(r#"input[placeholder*="Name"]"#),
        css(r#"input[aria-label="Your name"]"#),
    ],
    camera: &[
        css(r#"button[aria-label*="Turn off camera"]"#),
        css(r#"button[aria-label*="Turn on camera"]"#),
        css(r#"button[aria-label*="camera"]"#),
        css(r#"[aria-label*="camera"]"#),
        css(r#"button[aria-label*="Desativar câmera"]"#),
        css(r#"button[aria-label*="Ativar câmera"]"#),
    ],
    camera_off_labels: &["turn on camera", "ativar câmera"],
    join: &[
        xpath(r#"//button[.//span[text()="Ask to join"]]"#),
        xpath(r#"//button[.//span[text()="Pedir para participar"]]"#),
        xpath(r#"//button[.//span[text()="Participar agora"]]"#),
        xpath(r#"//button[.//span[text()="Join now"]]"#),
        xpath(r#"//button[.//span[text()="Join"]]"#),
        has_text("button", "Ask to join"),
        has_text("button", "Join now"),
        has_text("button", "Join"),
        has_text("button", "Pedir para participar"),
        has_text("button", "Participar agora"),
        has_text("button", "Participar"),
        css(r#"button[aria-label*="join"]"#),
        css(r#"button[aria-label*="Join"]"#),
        css(r#"button[aria-label*="participar"]"#),
        css(r#"button[aria-label*="Participar"]"#),
        css("button.VfPpkd-LgbsSe"),
        css(r#"button[jsname="Qx7uuf"]"#),
        css("button[data-promo-anchor-id]"),
    ],
    join_labels: &[
        "Ask to join",
        "Join now",
        "Join",
        "Pedir para participar",
        "Participar agora",
        "Participar",
    ],
    admission: AdmissionIndicators {
        loading: &[
            text_is("Getting ready..."),
            text_contains("Getting ready"),
            text_is("You'll be able to join in just a moment"),
            text_contains("be able to join in just a moment"),
            text_is("Preparando..."),
            text_contains("Preparando"),
        ],
        waiting_room: &[
            text_is("Asking to be let in..."),
            text_contains("Asking to be let in"),
            text_is("You'll join the call when someone lets you in"),
            text_contains("You'll join the call when someone lets you"),
            text_is("Waiting for the host to let you in"),
            text_is("You're in the waiting room"),
            text_is("Please wait until a meeting host brings you into the call"),
            text_is("Pedindo para entrar..."),
            text_contains("Pedindo para entrar"),
            text_is("Você entrará na chamada quando alguém permitir"),
            text_contains("Aguardando o anfitrião"),
            text_is("Você está na sala de espera"),
            css(r#"[aria-label*="waiting room"]"#),
            css(r#"[aria-label*="Asking to be let in"]"#),
            css(r#"[aria-label*="waiting for admission"]"#),
            css(r#"[aria-label*="sala de espera"]"#),
            css(r#"[role="progressbar"]"#),
            css(r#"[aria-label*="loading"]"#),
            css(".loading-spinner"),
        ],
        rejection: &[
            text_is("Meeting not found"),
            text_is("Can't join the meeting"),
            text_is("Unable to join"),
            text_is("Access denied"),
            text_is("Meeting has ended"),
            text_is("This meeting has ended"),
            text_is("Invalid meeting"),
            text_is("Meeting link expired"),
            text_is("You can't join this call"),
            text_is("Reunião não encontrada"),
            text_is("Não é possível participar da reunião"),
            text_is("Acesso negado"),
            text_is("A reunião terminou"),
            text_is("Link da reunião expirado"),
            has_text(r#"[role="dialog"]"#, "not found"),
            has_text(r#"[role="alertdialog"]"#, "not found"),
            has_text(r#"[role="dialog"]"#, "ended"),
            has_text(r#"[role="dialog"]"#, "não encontrada"),
            has_text("button", "Try again"),
            has_text("button", "Retry"),
            has_text("button", "Tentar novamente"),
        ],
        in_meeting: &[
            css(r#"button[aria-label*="Chat"]"#),
            css(r#"button[aria-label*="chat"]"#),
            css(r#"button[aria-label*="People"]"#),
            css(r#"button[aria-label*="people"]"#),
            css(r#"button[aria-label*="Participants"]"#),
            css(r#"button[aria-label*="Leave call"]"#),
            css(r#"button[aria-label*="Leave meeting"]"#),
            css(r#"button[aria-label*="Turn off microphone"]"#),
            css(r#"button[aria-label*="Turn on microphone"]"#),
            css(r#"button[aria-label*="Turn off camera"]"#),
            css(r#"button[aria-label*="Turn on camera"]"#),
            css(r#"[role="toolbar"]"#),
            css("[data-participant-id]"),
            css("[data-self-name]"),
            css(r#"button[aria-label*="Conversar"]"#),
            css(r#"button[aria-label*="Pessoas"]"#),
            css(r#"button[aria-label*="Participantes"]"#),
            css(r#"button[aria-label*="Sair da chamada"]"#),
        ],
    },
    leave: &[
        css(r#"button[aria-label="Leave call"]"#),
        css(r#"button[aria-label*="Leave"]"#),
        css(r#"button[aria-label*="leave"]"#),
        css(r#"[role="toolbar"] button[aria-label*="Leave"]"#),
        css(r#"button[aria-label="Sair da chamada"]"#),
        css(r#"button[aria-label*="Sair"]"#),
        css(r#"button[aria-label*="End meeting"]"#),
        has_text("button", "End meeting"),
        css(r#"button[aria-label*="Hang up"]"#),
    ],
    leave_confirm: &[
        has_text("button", "Leave meeting"),
        has_text("button", "Just leave the meeting"),
        has_text(r#"[role="dialog"] button"#, "Leave"),
        has_text("button", "Leave"),
    ],
};

pub static TEAMS: PlatformSelectors = PlatformSelectors {
    pre_join: &[
        css(r#"button[data-tid="joinOnWeb"]"#),
        has_text("button", "Continue on this browser"),
        has_text("button", "Join on the web instead"),
        text_contains("Continue on this browser"),
    ],
    name_input: &[
        css(r#"input[data-tid="prejoin-display-name-input"]"#),
        css(r#"input[placeholder="Type your name"]"#),
        css(r#"input[placeholder*="name"]"#),
        css(r#"input[aria-label*="name"]"#),
    ],
    camera: &[
        css(r#"[data-tid="toggle-video"]"#),
        css(r#"button[aria-label*="Turn camera off"]"#),
        css(r#"button[aria-label*="Turn camera on"]"#),
        css(r#"[aria-label*="camera"]"#),
    ],
    camera_off_labels: &["turn camera on", "camera is off", "turn on camera"],
    join: &[
        css("#prejoin-join-button"),
        css(r#"button[data-tid="prejoin-join-button"]"#),
        has_text("button", "Join now"),
        css(r#"button[aria-label*="Join now"]"#),
    ],
    join_labels: &["Join now", "Join"],
    admission: AdmissionIndicators {
        loading: &[
            text_contains("Connecting"),
            text_contains("Getting ready"),
        ],
        waiting_room: &[
            text_contains("Someone in the meeting should let you in soon"),
            text_contains("we'll let people know you're waiting"),
            css(r#"[data-tid="lobby-screen"]"#),
        ],
        rejection: &[
            text_contains("You've been denied access"),
            text_contains("you were denied access to the meeting"),
            text_contains("You've been removed from this meeting"),
            text_contains("The meeting has ended"),
        ],
        in_meeting: &[
            css("#hangup-button"),
            css(r#"button[data-tid="hangup-main-btn"]"#),
            css("#roster-button"),
            css("#chat-button"),
            css(r#"button[aria-label*="People"]"#),
        ],
    },
    leave: &[
        css("#hangup-button"),
        css(r#"button[data-tid="hangup-main-btn"]"#),
        css(r#"button[aria-label="Leave"]"#),
        css(r#"button[aria-label*="Leave"]"#),
    ],
    leave_confirm: &[has_text(r#"[role="dialog"] button"#, "Leave")],
};
