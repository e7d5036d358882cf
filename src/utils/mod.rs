pub mod bins;
pub mod lock;
pub mod process;

pub mod time {
    use anyhow::{Context, Result, anyhow};
    use time::{
        OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::well_known::Rfc3339,
    };

    /// Parses a database timestamp. Dumps carry naive UTC values
    /// (`2015-03-01T10:11:12[.ffffff]`), hand-written filters usually RFC3339.
    pub fn parse_db_datetime(s: &str) -> Result<OffsetDateTime> {
        let s = s.trim();
        if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
            return Ok(dt.to_offset(UtcOffset::UTC));
        }
        let normalized = s.replacen(' ', "T", 1);
        let (fmt_src, value) = match normalized.split_once('.') {
            Some((_, frac)) if !frac.is_empty() => (
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
                normalized.as_str(),
            ),
            _ => (
                "[year]-[month]-[day]T[hour]:[minute]:[second]",
                normalized.trim_end_matches('.'),
            ),
        };
        let fmt = time::format_description::parse(fmt_src)
            .map_err(|e| anyhow!("bad datetime format description: {e}"))?;
        let dt = PrimitiveDateTime::parse(value, &fmt)
            .with_context(|| format!("invalid datetime: {s}"))?;
        Ok(dt.assume_utc())
    }

}
