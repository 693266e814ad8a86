//! Diesel schema for queue persistence.

diesel::table! {
    /// Durable task records.
    tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Latest mutation timestamp.
        updated_at -> Timestamptz,
        /// Handler tag.
        #[max_length = 255]
        task_type -> Varchar,
        /// Scheduling priority, lower is sooner.
        priority -> Int4,
        /// Opaque payload.
        payload -> Jsonb,
        /// Lifecycle status.
        #[max_length = 16]
        status -> Varchar,
        /// Earliest claim time.
        available_at -> Timestamptz,
        /// Lease holder.
        #[max_length = 255]
        locked_by -> Nullable<Varchar>,
        /// Lease grant time.
        locked_at -> Nullable<Timestamptz>,
        /// Lease expiry.
        lock_expires_at -> Nullable<Timestamptz>,
        /// Audit correlation identifier.
        run_id -> Nullable<Uuid>,
        /// Originating task.
        parent_task_id -> Nullable<Uuid>,
        /// Failed attempts so far.
        attempts -> Int4,
        /// Attempt cap.
        max_attempts -> Int4,
        /// Most recent failure description.
        last_error -> Nullable<Text>,
        /// Success result.
        result -> Nullable<Jsonb>,
    }
}

diesel::table! {
    /// Worker liveness rows.
    worker_heartbeats (worker_id) {
        /// Worker identity.
        #[max_length = 255]
        worker_id -> Varchar,
        /// First report time.
        started_at -> Timestamptz,
        /// Latest report time.
        last_seen_at -> Timestamptz,
        /// Published poll interval in seconds.
        poll_s -> Int4,
        /// Published lease duration in seconds.
        lock_s -> Int4,
    }
}
