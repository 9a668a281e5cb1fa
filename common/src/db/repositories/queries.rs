// SQL query constants for repositories
// Centralizes repeated SELECT column lists to follow DRY principle

/// SQL query fragments for call_jobs table
pub mod call_job_queries {
    /// All columns for call_jobs table
    pub const SELECT_ALL_COLUMNS: &str = r#"id, campaign_id, user_id, phone_number, status,
        scheduled_for, attempts, last_error, created_at, updated_at"#;
}

/// SQL query fragments for the campaign scheduling reload
pub mod campaign_queries {
    /// Active campaigns joined with their owner's timezone and an aggregate
    /// over still-queued call jobs. Campaigns with nothing queued are
    /// excluded so the scheduler never plans a wake for them.
    ///
    /// A job with no `scheduled_for` is dispatchable the moment the window
    /// opens, so the aggregate reports no deferral as soon as one exists;
    /// a bare MIN would skip the NULLs and defer the whole campaign.
    pub const SELECT_SCHEDULABLE: &str = r#"
        SELECT
            c.id AS campaign_id,
            c.user_id,
            c.status,
            c.first_call_time,
            c.last_call_time,
            c.timezone AS campaign_timezone,
            c.use_campaign_timezone,
            u.timezone AS user_timezone,
            q.queued_count,
            q.next_scheduled_at
        FROM campaigns c
        JOIN users u ON u.id = c.user_id
        JOIN LATERAL (
            SELECT
                COUNT(*) AS queued_count,
                CASE
                    WHEN COUNT(*) FILTER (WHERE j.scheduled_for IS NULL) > 0 THEN NULL
                    ELSE MIN(j.scheduled_for)
                END AS next_scheduled_at
            FROM call_jobs j
            WHERE j.campaign_id = c.id AND j.status = 'queued'
        ) q ON TRUE
        WHERE c.status = 'active' AND q.queued_count > 0
        ORDER BY c.id
    "#;
}
