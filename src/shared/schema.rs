diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Text,
        password_hash -> Text,
        full_name -> Text,
        role -> Text,
        avatar_url -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Int8,
        location -> Text,
        priority -> Text,
        category -> Text,
        subject -> Text,
        description -> Text,
        solution -> Nullable<Text>,
        proof_image_url -> Nullable<Text>,
        requester_id -> Uuid,
        status -> Text,
        created_at -> Timestamptz,
        first_response_at -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        closed_at -> Nullable<Timestamptz>,
        is_handover -> Bool,
        is_converted_to_article -> Bool,
    }
}

diesel::table! {
    ticket_activities (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        actor_id -> Uuid,
        kind -> Text,
        note -> Text,
        previous_value -> Nullable<Text>,
        new_value -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    knowledge_articles (id) {
        id -> Uuid,
        title -> Text,
        content -> Text,
        category -> Text,
        author_id -> Uuid,
        is_verified -> Bool,
        views_count -> Int4,
        helpful_count -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    routine_templates (id) {
        id -> Uuid,
        title -> Text,
        cron_schedule -> Text,
        deadline_minutes -> Int4,
        checklist_items -> Jsonb,
        created_by -> Uuid,
        is_active -> Bool,
    }
}

diesel::table! {
    routine_instances (id) {
        id -> Uuid,
        template_id -> Uuid,
        assigned_user_id -> Uuid,
        checklist_state -> Jsonb,
        generated_at -> Timestamptz,
        due_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
        status -> Text,
    }
}

diesel::table! {
    shifts (id) {
        id -> Uuid,
        user_id -> Uuid,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        label -> Text,
    }
}

diesel::table! {
    push_subscriptions (id) {
        id -> Uuid,
        user_id -> Uuid,
        endpoint -> Text,
        p256dh -> Text,
        auth -> Text,
    }
}

diesel::joinable!(tickets -> users (requester_id));
diesel::joinable!(ticket_activities -> tickets (ticket_id));
diesel::joinable!(ticket_activities -> users (actor_id));
diesel::joinable!(knowledge_articles -> users (author_id));
diesel::joinable!(routine_instances -> routine_templates (template_id));
diesel::joinable!(routine_instances -> users (assigned_user_id));
diesel::joinable!(shifts -> users (user_id));
diesel::joinable!(push_subscriptions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    tickets,
    ticket_activities,
    knowledge_articles,
    routine_templates,
    routine_instances,
    shifts,
    push_subscriptions,
);
