table! {
    activity (id) {
        id -> Int4,
        username -> Nullable<Varchar>,
        action -> Varchar,
        page -> Nullable<Varchar>,
        user_agent -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

table! {
    department (id) {
        id -> Int4,
        code -> Varchar,
        name -> Varchar,
    }
}

table! {
    fcm_user_contact (registration_id) {
        registration_id -> Varchar,
        user_id -> Int4,
    }
}

table! {
    live_tank (id) {
        id -> Int4,
        tank_id -> Int4,
        product -> Nullable<Varchar>,
        level -> Nullable<Numeric>,
        target_type -> Varchar,
        target_value -> Numeric,
        flow_rate -> Numeric,
        flow_unit -> Varchar,
        finish_at -> Timestamp,
        notes -> Nullable<Varchar>,
        status -> Varchar,
        added_by -> Int4,
        added_at -> Timestamp,
        modified_by -> Nullable<Int4>,
        modified_at -> Nullable<Timestamp>,
    }
}

table! {
    session (id) {
        id -> Uuid,
        user_id -> Int4,
        created_at -> Timestamp,
        expires_at -> Timestamp,
        last_activity -> Timestamp,
    }
}

table! {
    tank (id) {
        id -> Int4,
        department_id -> Int4,
        number -> Varchar,
        product -> Nullable<Varchar>,
        bbl_per_meter -> Numeric,
        min_level -> Numeric,
        max_level -> Numeric,
        enabled -> Bool,
    }
}

table! {
    tank_reminder (id) {
        id -> Int4,
        tank_id -> Int4,
        user_id -> Int4,
        phone_number -> Nullable<Varchar>,
        intervals -> Array<Int4>,
        sent_intervals -> Array<Int4>,
        finish_at -> Timestamp,
        active -> Bool,
        last_sent -> Nullable<Timestamp>,
        last_error -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

table! {
    user_access (user_id, department_id) {
        user_id -> Int4,
        department_id -> Int4,
    }
}

table! {
    user_account (id) {
        id -> Int4,
        username -> Varchar,
        password_hash -> Varchar,
        last_password_change -> Timestamp,
        permission -> Bpchar,
        phone_number -> Nullable<Varchar>,
        is_active -> Bool,
    }
}

table! {
    user_device (id) {
        id -> Int4,
        user_id -> Int4,
        fingerprint -> Varchar,
        label -> Nullable<Varchar>,
        first_seen -> Timestamp,
        last_seen -> Timestamp,
    }
}

joinable!(fcm_user_contact -> user_account (user_id));
joinable!(live_tank -> tank (tank_id));
joinable!(session -> user_account (user_id));
joinable!(tank -> department (department_id));
joinable!(tank_reminder -> tank (tank_id));
joinable!(tank_reminder -> user_account (user_id));
joinable!(user_access -> department (department_id));
joinable!(user_access -> user_account (user_id));
joinable!(user_device -> user_account (user_id));

allow_tables_to_appear_in_same_query!(
    activity,
    department,
    fcm_user_contact,
    live_tank,
    session,
    tank,
    tank_reminder,
    user_access,
    user_account,
    user_device,
);
