// SQLite schema definitions
// This file mirrors schema.rs but uses SQLite-compatible types: integer
// keys, RFC3339 TEXT timestamps, JSON serialized into TEXT columns.

diesel::table! {
    channels (id) {
        id -> Integer,
        username -> Text,
        display_name -> Text,
        description -> Nullable<Text>,
        avatar_url -> Nullable<Text>,
        category -> Nullable<Text>,
        is_public -> Bool,
        premium -> Bool,
        is_realtime -> Bool,
        is_owner_db -> Bool,
        owner_user_id -> Nullable<Text>,
        tenant_id -> Nullable<Text>,
        related_channels -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        user_id -> Text,
        display_name -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    superfeed (id) {
        id -> Integer,
        channel_username -> Text,
        item_type -> Text,
        content -> Text,
        caption -> Nullable<Text>,
        message -> Nullable<Text>,
        media -> Text,
        metadata -> Text,
        stats -> Text,
        interactive_content -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    interactive_responses (id) {
        id -> Integer,
        user_id -> Text,
        feed_item_id -> BigInt,
        response_type -> Text,
        payload -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    channels_messages (id) {
        id -> Integer,
        channel_username -> Text,
        message_text -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    channels_activity (id) {
        id -> Integer,
        channel_username -> Text,
        last_message -> Nullable<Text>,
        message_count -> BigInt,
        last_updated -> Text,
    }
}

diesel::table! {
    user_channel_last_viewed (id) {
        id -> Integer,
        user_id -> Text,
        channel_username -> Text,
        last_viewed -> Text,
        message_count -> BigInt,
    }
}

diesel::table! {
    tenant_requests (id) {
        id -> Integer,
        request_id -> Text,
        request_type -> Text,
        user_id -> Text,
        channel_username -> Text,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    relay_outbox (id) {
        id -> Integer,
        event_id -> Text,
        event_kind -> Text,
        payload -> Text,
        status -> Text,
        attempts -> Integer,
        next_attempt_at -> Text,
        last_error -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    user_language (id) {
        id -> Integer,
        user_id -> Text,
        language -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    user_notifications (id) {
        id -> Integer,
        user_id -> Text,
        notifications_enabled -> Bool,
        updated_at -> Text,
    }
}

diesel::table! {
    user_location (id) {
        id -> Integer,
        user_id -> Text,
        latitude -> Double,
        longitude -> Double,
        place_name -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    channels,
    users,
    superfeed,
    interactive_responses,
    channels_messages,
    channels_activity,
    user_channel_last_viewed,
    tenant_requests,
    relay_outbox,
    user_language,
    user_notifications,
    user_location,
);
