use super::*;

fn waha_json(body: serde_json::Value) -> WahaWebhook {
    serde_json::from_value(body).expect("webhook must deserialize")
}

// ── User id normalization ──

#[test]
fn test_normalize_preserves_lid() {
    assert_eq!(normalize_user_id("99887:12@lid"), "99887:12@lid");
}

#[test]
fn test_normalize_preserves_server_jid() {
    assert_eq!(
        normalize_user_id("628123456789@s.whatsapp.net"),
        "628123456789@s.whatsapp.net"
    );
}

#[test]
fn test_normalize_rewrites_legacy_suffix() {
    assert_eq!(
        normalize_user_id("628123456789@c.us"),
        "628123456789@s.whatsapp.net"
    );
}

#[test]
fn test_normalize_bare_digits() {
    assert_eq!(
        normalize_user_id("628123456789"),
        "628123456789@s.whatsapp.net"
    );
    // Too short to be a phone number: untouched.
    assert_eq!(normalize_user_id("12345"), "12345");
}

#[test]
fn test_normalize_passthrough() {
    assert_eq!(normalize_user_id("status@broadcast"), "status@broadcast");
}

// ── WhatsApp webhook normalization ──

#[test]
fn test_from_waha_private_message() {
    let webhook = waha_json(serde_json::json!({
        "event": "message",
        "session": "default",
        "payload": {
            "id": "m1",
            "from": "628123456789@c.us",
            "body": "Halo",
            "fromMe": false,
            "timestamp": 1719828000,
            "_data": { "pushName": "Budi" }
        }
    }));

    let msg = from_waha(&webhook).expect("message expected");
    assert_eq!(msg.transport, Transport::Whatsapp);
    assert_eq!(msg.message_id, "m1");
    assert_eq!(msg.user_id, "628123456789@s.whatsapp.net");
    assert_eq!(msg.text, "Halo");
    assert!(!msg.from_me);
    assert!(!msg.is_group);
    assert!(!msg.is_broadcast);
    assert_eq!(msg.metadata.push_name.as_deref(), Some("Budi"));
    assert_eq!(msg.metadata.phone.as_deref(), Some("628123456789"));
    assert!(validate(&msg).is_ok());
}

#[test]
fn test_from_waha_non_message_event() {
    let webhook = waha_json(serde_json::json!({
        "event": "session.status",
        "session": "default"
    }));
    assert!(from_waha(&webhook).is_none());
}

#[test]
fn test_from_waha_lid_with_alt() {
    let webhook = waha_json(serde_json::json!({
        "event": "message",
        "payload": {
            "id": "m2",
            "from": "99887:12@lid",
            "body": "Halo",
            "fromMe": false,
            "timestamp": 1719828000,
            "_data": {
                "key": {
                    "remoteJid": "99887:12@lid",
                    "remoteJidAlt": "628123456789@s.whatsapp.net",
                    "fromMe": false
                },
                "pushName": "Budi"
            }
        }
    }));

    let msg = from_waha(&webhook).unwrap();
    assert_eq!(msg.user_id, "99887:12@lid");
    assert_eq!(
        msg.metadata.alt_id.as_deref(),
        Some("628123456789@s.whatsapp.net")
    );
    // The phone digits come from the alternate jid.
    assert_eq!(msg.metadata.phone.as_deref(), Some("628123456789"));
}

#[test]
fn test_from_waha_group_flags() {
    let by_chat_id = waha_json(serde_json::json!({
        "event": "message",
        "payload": {
            "id": "m3",
            "from": "628123456789@c.us",
            "chatId": "1203630@g.us",
            "body": "halo semua",
            "fromMe": false
        }
    }));
    let msg = from_waha(&by_chat_id).unwrap();
    assert!(msg.is_group);
    assert_eq!(validate(&msg), Err(Rejection::Group));
    assert_eq!(Rejection::Group.response_type(), "group_ignored");

    let by_participant = waha_json(serde_json::json!({
        "event": "message",
        "payload": {
            "id": "m4",
            "from": "1203630@g.us",
            "participant": "628123456789@c.us",
            "body": "halo semua",
            "fromMe": false
        }
    }));
    assert!(from_waha(&by_participant).unwrap().is_group);

    let by_flag = waha_json(serde_json::json!({
        "event": "message",
        "payload": {
            "id": "m5",
            "from": "628123456789@c.us",
            "isGroup": true,
            "body": "halo semua",
            "fromMe": false
        }
    }));
    assert!(from_waha(&by_flag).unwrap().is_group);
}

#[test]
fn test_from_waha_broadcast() {
    let webhook = waha_json(serde_json::json!({
        "event": "message",
        "payload": {
            "id": "m6",
            "from": "628123456789@c.us",
            "chatId": "status@broadcast",
            "body": "status update",
            "fromMe": false
        }
    }));
    let msg = from_waha(&webhook).unwrap();
    assert!(msg.is_broadcast);
    assert_eq!(validate(&msg), Err(Rejection::Broadcast));
    assert_eq!(Rejection::Broadcast.response_type(), "broadcast_ignored");
}

#[test]
fn test_from_waha_own_outbound_targets_recipient() {
    let webhook = waha_json(serde_json::json!({
        "event": "message.any",
        "payload": {
            "id": "out1",
            "from": "628999999@c.us",
            "to": "628123456789@c.us",
            "chatId": "628123456789@c.us",
            "body": "Halo dari kami",
            "fromMe": true
        }
    }));

    let msg = from_waha(&webhook).unwrap();
    assert!(msg.from_me);
    assert_eq!(msg.user_id, "628123456789@s.whatsapp.net");
    assert_eq!(validate(&msg), Err(Rejection::FromMe));
    assert_eq!(Rejection::FromMe.response_type(), "from_me");
}

#[test]
fn test_validate_rejects_gaps() {
    let webhook = waha_json(serde_json::json!({
        "event": "message",
        "payload": { "id": "", "from": "628123456789@c.us", "body": "Halo", "fromMe": false }
    }));
    let msg = from_waha(&webhook).unwrap();
    assert_eq!(validate(&msg), Err(Rejection::MissingMessageId));

    let webhook = waha_json(serde_json::json!({
        "event": "message",
        "payload": { "id": "m1", "from": "628123456789@c.us", "body": "   ", "fromMe": false }
    }));
    let msg = from_waha(&webhook).unwrap();
    assert_eq!(validate(&msg), Err(Rejection::EmptyText));
}

// ── Telegram update normalization ──

fn telegram_update(body: serde_json::Value) -> TelegramUpdate {
    serde_json::from_value(body).expect("update must deserialize")
}

#[test]
fn test_from_telegram_private_text() {
    let update = telegram_update(serde_json::json!({
        "update_id": 1001,
        "message": {
            "message_id": 55,
            "from": { "id": 777000111, "is_bot": false, "first_name": "Budi" },
            "chat": { "id": 777000111, "type": "private" },
            "date": 1719828000,
            "text": "Halo"
        }
    }));

    let msg = from_telegram(&update).expect("message expected");
    assert_eq!(msg.transport, Transport::Telegram);
    assert_eq!(msg.message_id, "777000111:55");
    assert_eq!(msg.user_id, "777000111");
    assert_eq!(msg.text, "Halo");
    assert_eq!(msg.metadata.push_name.as_deref(), Some("Budi"));
    assert!(validate(&msg).is_ok());
}

#[test]
fn test_from_telegram_rejects_bot_author() {
    let update = telegram_update(serde_json::json!({
        "update_id": 1002,
        "message": {
            "message_id": 56,
            "from": { "id": 999, "is_bot": true, "first_name": "SomeBot" },
            "chat": { "id": 777000111, "type": "private" },
            "date": 1719828000,
            "text": "beep"
        }
    }));
    assert_eq!(from_telegram(&update), Err(Rejection::BotAuthor));
}

#[test]
fn test_from_telegram_rejects_non_private() {
    let update = telegram_update(serde_json::json!({
        "update_id": 1003,
        "message": {
            "message_id": 57,
            "from": { "id": 777000111, "is_bot": false },
            "chat": { "id": -100555, "type": "supergroup" },
            "date": 1719828000,
            "text": "halo semua"
        }
    }));
    assert_eq!(from_telegram(&update), Err(Rejection::NonPrivateChat));
}

#[test]
fn test_from_telegram_rejects_non_text() {
    let update = telegram_update(serde_json::json!({
        "update_id": 1004,
        "message": {
            "message_id": 58,
            "from": { "id": 777000111, "is_bot": false },
            "chat": { "id": 777000111, "type": "private" },
            "date": 1719828000
        }
    }));
    assert_eq!(from_telegram(&update), Err(Rejection::NonText));

    let no_message = telegram_update(serde_json::json!({ "update_id": 1005 }));
    assert_eq!(from_telegram(&no_message), Err(Rejection::NonText));
}

// ── Intent detection ──

#[test]
fn test_intent_greeting() {
    assert_eq!(detect_intent("Halo"), Intent::Greeting);
    assert_eq!(detect_intent("selamat pagi kak"), Intent::Greeting);
    assert_eq!(detect_intent("  Hey there"), Intent::Greeting);
}

#[test]
fn test_intent_option_select() {
    assert_eq!(detect_intent("1"), Intent::OptionSelect);
    assert_eq!(detect_intent(" 3 "), Intent::OptionSelect);
    assert_eq!(detect_intent("9"), Intent::OptionSelect);
    assert_ne!(detect_intent("0"), Intent::OptionSelect);
    assert_ne!(detect_intent("12"), Intent::OptionSelect);
}

#[test]
fn test_intent_question() {
    assert_eq!(detect_intent("ini bisa dicicil?"), Intent::Question);
    assert_eq!(detect_intent("berapa modalnya"), Intent::Question);
    assert_eq!(detect_intent("how does this work"), Intent::Question);
}

#[test]
fn test_intent_form_response() {
    assert_eq!(
        detect_intent("Nama: Budi\nBudget: 100 juta"),
        Intent::FormResponse
    );
    // Newline alone is enough when nothing else matched.
    assert_eq!(detect_intent("baris satu\nbaris dua"), Intent::FormResponse);
}

#[test]
fn test_intent_unknown() {
    assert_eq!(detect_intent("oke"), Intent::Unknown);
    assert_eq!(detect_intent(""), Intent::Unknown);
}
