diesel::table! {
    payments (id) {
        id -> Int8,
        transaction_id -> Varchar,
        sender_account -> Varchar,
        receiver_account -> Varchar,
        amount -> Numeric,
        currency -> Varchar,
        status -> Varchar,
        payment_method -> Nullable<Varchar>,
        description -> Nullable<Varchar>,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
