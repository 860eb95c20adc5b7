diesel::table! {
    channels (id) {
        id -> BigInt,
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
        related_channels -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> BigInt,
        user_id -> Text,
        display_name -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    superfeed (id) {
        id -> BigInt,
        channel_username -> Text,
        item_type -> Text,
        content -> Text,
        caption -> Nullable<Text>,
        message -> Nullable<Text>,
        media -> Jsonb,
        metadata -> Jsonb,
        stats -> Jsonb,
        interactive_content -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    interactive_responses (id) {
        id -> BigInt,
        user_id -> Text,
        feed_item_id -> BigInt,
        response_type -> Text,
        payload -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    channels_messages (id) {
        id -> BigInt,
        channel_username -> Text,
        message_text -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    channels_activity (id) {
        id -> BigInt,
        channel_username -> Text,
        last_message -> Nullable<Jsonb>,
        message_count -> BigInt,
        last_updated -> Timestamptz,
    }
}

diesel::table! {
    user_channel_last_viewed (id) {
        id -> BigInt,
        user_id -> Text,
        channel_username -> Text,
        last_viewed -> Timestamptz,
        message_count -> BigInt,
    }
}

diesel::table! {
    tenant_requests (id) {
        id -> BigInt,
        request_id -> Text,
        request_type -> Text,
        user_id -> Text,
        channel_username -> Text,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    relay_outbox (id) {
        id -> BigInt,
        event_id -> Text,
        event_kind -> Text,
        payload -> Jsonb,
        status -> Text,
        attempts -> Integer,
        next_attempt_at -> Timestamptz,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_language (id) {
        id -> BigInt,
        user_id -> Text,
        language -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_notifications (id) {
        id -> BigInt,
        user_id -> Text,
        notifications_enabled -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_location (id) {
        id -> BigInt,
        user_id -> Text,
        latitude -> Double,
        longitude -> Double,
        place_name -> Nullable<Text>,
        updated_at -> Timestamptz,
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
