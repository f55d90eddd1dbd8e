use crate::domain::{
    CallbackPayload, Event, EventKind, InboundMessage, JoinRequest, MessageRef, UserProfile,
};

use super::update::{RawMessage, RawUpdate, RawUser};

/// Maps one raw update to exactly one event.
///
/// Precedence when several payloads are present: join request, callback
/// query, message. A join request without a requesting user id is ignored.
pub fn classify(update: &RawUpdate) -> Event {
    let kind = if let Some(request) = update
        .chat_join_request
        .as_ref()
        .filter(|request| request.from.id != 0)
    {
        EventKind::JoinRequest(JoinRequest {
            user: profile(&request.from),
            chat_id: request.chat.id,
        })
    } else if let Some(query) = &update.callback_query {
        EventKind::Callback(CallbackPayload {
            from: profile(&query.from),
            origin: query.message.as_ref().map(message_ref),
            data: query.data.clone().unwrap_or_default(),
        })
    } else if let Some(message) = &update.message {
        EventKind::Message(InboundMessage {
            message: message_ref(message),
            from: message.from.as_ref().map(profile),
            text: message.text.clone().unwrap_or_default(),
        })
    } else {
        EventKind::Unknown
    };

    Event {
        update_id: update.update_id,
        kind,
    }
}

fn profile(user: &RawUser) -> UserProfile {
    UserProfile {
        id: user.id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone().unwrap_or_default(),
        username: user.username.clone().unwrap_or_default(),
    }
}

fn message_ref(message: &RawMessage) -> MessageRef {
    MessageRef {
        chat_id: message.chat.id,
        message_id: message.message_id,
    }
}
