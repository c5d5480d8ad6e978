diesel::table! {
    events (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Varchar,
        status -> Varchar,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    event_sections (event_id, id) {
        event_id -> Uuid,
        id -> Uuid,
        position -> Int4,
        name -> Varchar,
        price -> Numeric,
        capacity -> Int4,
        remaining -> Int4,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        event_id -> Uuid,
        section_id -> Uuid,
        qty -> Int4,
        user_id -> Varchar,
        total_price -> Numeric,
        status -> Varchar,
        lock_token -> Nullable<Varchar>,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(event_sections -> events (event_id));
diesel::joinable!(bookings -> events (event_id));

diesel::allow_tables_to_appear_in_same_query!(
    events,
    event_sections,
    bookings,
);
