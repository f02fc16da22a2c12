use chrono::{NaiveDate, NaiveTime};

pub fn greeting(trigger_at: NaiveTime) -> String {
    format!(
        "Hi, I am a bot that daily informs about the official dollar exchange rate at {}. \u{1F916}",
        trigger_at.format("%H:%M")
    )
}

pub fn daily_rate(date: NaiveDate, value: f64) -> String {
    format!(
        "Dollar exchange rate for today ({}): {value} \u{1F4B5}",
        date.format("%d/%m/%Y")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_rate_embeds_date_and_value() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(
            daily_rate(date, 93.25),
            "Dollar exchange rate for today (09/03/2026): 93.25 💵"
        );
    }

    #[test]
    fn greeting_mentions_trigger_time() {
        let at = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        assert!(greeting(at).contains("at 15:00."));
    }
}
