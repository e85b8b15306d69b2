//! Reply templates.
//!
//! The handler never hard-codes reply content: every outgoing text is
//! fetched by key from this registry, which layers config-file overrides
//! over built-in defaults.

use std::collections::HashMap;

/// Keys for the bot's reply texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    /// Greeting menu with the three numbered options.
    Welcome,
    /// Acknowledgement after option 1, sent before the blank form.
    ChooseOptionAck,
    /// The blank qualification form.
    FormTemplate,
    /// Acknowledgement after a complete form.
    FormReceived,
    /// Acknowledgement after option 2.
    PartnershipAck,
    /// Acknowledgement after option 3.
    OtherNeedsAck,
    /// Acknowledgement for messages in operator-owned states.
    QuestionReceived,
    /// Reply to an unrecognized menu choice.
    InvalidOption,
    /// Reply when repeated invalid input hands the lead to an operator.
    EscalationNotice,
}

impl TemplateKey {
    /// Configuration key for this template.
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::Welcome => "WELCOME",
            TemplateKey::ChooseOptionAck => "CHOOSE_OPTION_ACK",
            TemplateKey::FormTemplate => "FORM_TEMPLATE",
            TemplateKey::FormReceived => "FORM_RECEIVED",
            TemplateKey::PartnershipAck => "PARTNERSHIP_ACK",
            TemplateKey::OtherNeedsAck => "OTHER_NEEDS_ACK",
            TemplateKey::QuestionReceived => "QUESTION_RECEIVED",
            TemplateKey::InvalidOption => "INVALID_OPTION",
            TemplateKey::EscalationNotice => "ESCALATION_NOTICE",
        }
    }

    fn default_text(&self) -> &'static str {
        match self {
            TemplateKey::Welcome => {
                "Halo! Terima kasih sudah menghubungi kami 🙌\n\n\
                 Silakan pilih salah satu:\n\
                 1. Info kemitraan\n\
                 2. Kerja sama / partnership\n\
                 3. Kebutuhan lain\n\n\
                 Balas dengan angka 1, 2, atau 3."
            }
            TemplateKey::ChooseOptionAck => {
                "Siap! Berikut formulir singkat supaya tim kami bisa menyiapkan \
                 info yang pas. Mohon diisi ya 🙏"
            }
            TemplateKey::FormTemplate => {
                "Nama, Domisili:\n\
                 Sumber info:\n\
                 Jenis bisnis:\n\
                 Budget:\n\
                 Rencana mulai:"
            }
            TemplateKey::FormReceived => {
                "Terima kasih! Data kamu sudah kami terima. \
                 Tim kami akan menghubungi kamu segera 🙌"
            }
            TemplateKey::PartnershipAck => {
                "Terima kasih atas minat kerja samanya! \
                 Pesan kamu sudah kami teruskan ke tim partnership."
            }
            TemplateKey::OtherNeedsAck => {
                "Baik, pesan kamu sudah kami teruskan ke tim kami. Mohon ditunggu ya."
            }
            TemplateKey::QuestionReceived => {
                "Pesan kamu sudah kami terima dan teruskan ke tim. Mohon ditunggu ya 🙏"
            }
            TemplateKey::InvalidOption => {
                "Maaf, pilihan tidak dikenali. Balas dengan angka 1, 2, atau 3 ya."
            }
            TemplateKey::EscalationNotice => {
                "Sepertinya ada kendala. Kami hubungkan kamu dengan tim kami ya, \
                 mohon ditunggu 🙏"
            }
        }
    }
}

/// Template registry: config overrides over built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    overrides: HashMap<String, String>,
}

impl Templates {
    /// Build a registry from the `[templates]` config table.
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Fetch the text for a key.
    pub fn get(&self, key: TemplateKey) -> String {
        self.overrides
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| key.default_text().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_present_for_every_key() {
        let templates = Templates::default();
        for key in [
            TemplateKey::Welcome,
            TemplateKey::ChooseOptionAck,
            TemplateKey::FormTemplate,
            TemplateKey::FormReceived,
            TemplateKey::PartnershipAck,
            TemplateKey::OtherNeedsAck,
            TemplateKey::QuestionReceived,
            TemplateKey::InvalidOption,
            TemplateKey::EscalationNotice,
        ] {
            assert!(!templates.get(key).is_empty(), "{} empty", key.as_str());
        }
    }

    #[test]
    fn test_welcome_lists_three_options() {
        let welcome = Templates::default().get(TemplateKey::Welcome);
        for option in ["1.", "2.", "3."] {
            assert!(welcome.contains(option), "missing option {option}");
        }
    }

    #[test]
    fn test_form_template_has_all_labels() {
        let form = Templates::default().get(TemplateKey::FormTemplate);
        for label in [
            "Nama, Domisili:",
            "Sumber info:",
            "Jenis bisnis:",
            "Budget:",
            "Rencana mulai:",
        ] {
            assert!(form.contains(label), "missing label {label}");
        }
    }

    #[test]
    fn test_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert("WELCOME".to_string(), "custom welcome".to_string());
        let templates = Templates::new(overrides);

        assert_eq!(templates.get(TemplateKey::Welcome), "custom welcome");
        // Other keys still fall back to defaults.
        assert_ne!(templates.get(TemplateKey::InvalidOption), "");
    }
}
