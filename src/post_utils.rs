use chrono::{NaiveDate, TimeZone};

use crate::model::{Direction, Post, PostType};

/// One rendered line item of the post list, top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRow {
    DateSeparator(NaiveDate),
    NewMessages,
    Post(String),
    ChannelIntro,
    MaxLoaded,
    Loader(Direction),
    ManualLoad(Direction),
}

impl ListRow {
    pub fn post_id(&self) -> Option<&str> {
        match self {
            ListRow::Post(id) => Some(id),
            _ => None,
        }
    }
}

pub fn local_date<Tz: TimeZone>(create_at: i64, tz: &Tz) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(create_at)
        .single()
        .map(|at| at.date_naive())
}

/// Lays out posts (given newest-first) oldest at the top, with a date
/// separator at every calendar-day change and a single "new messages" marker
/// before the first post the user has not seen.
pub fn create_posts<Tz: TimeZone>(
    posts: &[Post],
    last_viewed_at: i64,
    current_user_id: &str,
    tz: &Tz,
) -> Vec<ListRow> {
    let mut rows = Vec::with_capacity(posts.len() + 4);
    let mut previous_day: Option<NaiveDate> = None;
    let mut rendered_last_viewed = false;

    for post in posts.iter().rev() {
        if post.post_type == PostType::EphemeralAddToChannel {
            continue;
        }

        let day = local_date(post.create_at, tz);
        if let Some(current) = day.filter(|current| Some(*current) != previous_day) {
            rows.push(ListRow::DateSeparator(current));
        }

        let not_current_user = post.user_id != current_user_id || post.from_webhook;
        if not_current_user
            && last_viewed_at != 0
            && post.create_at > last_viewed_at
            && !post.is_ephemeral()
            && !rendered_last_viewed
        {
            rendered_last_viewed = true;
            rows.push(ListRow::NewMessages);
        }

        rows.push(ListRow::Post(post.id.clone()));
        previous_day = day;
    }

    rows
}

/// Index of the first post row still visible at `scroll_top`, given the
/// measured height of every row.
pub fn top_visible_post(rows: &[ListRow], heights: &[u32], scroll_top: u32) -> Option<usize> {
    let mut top = 0u32;
    for (index, row) in rows.iter().enumerate() {
        let height = heights.get(index).copied().unwrap_or(0);
        let bottom = top.saturating_add(height);
        if bottom > scroll_top && row.post_id().is_some() {
            return Some(index);
        }
        top = bottom;
    }
    None
}

pub fn date_separator_label(day: NaiveDate, today: NaiveDate) -> String {
    if day == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(day) {
        "Yesterday".to_string()
    } else {
        day.format("%a, %b %d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn post(id: &str, create_at: i64, user: &str) -> Post {
        Post {
            id: id.into(),
            create_at,
            user_id: user.into(),
            channel_id: "c".into(),
            ..Post::default()
        }
    }

    fn separators(rows: &[ListRow]) -> usize {
        rows.iter()
            .filter(|row| matches!(row, ListRow::DateSeparator(_)))
            .count()
    }

    #[test]
    fn one_separator_per_day_boundary() {
        let base = 10 * DAY + 1000;
        let posts = vec![
            post("5", base + 2 * DAY + 5, "u1"),
            post("4", base + 2 * DAY, "u1"),
            post("3", base + DAY, "u1"),
            post("2", base + 10, "u1"),
            post("1", base, "u1"),
        ];
        let rows = create_posts(&posts, 0, "u2", &Utc);
        assert_eq!(separators(&rows), 3);
        assert_eq!(rows.first(), Some(&ListRow::DateSeparator(local_date(base, &Utc).unwrap())));
    }

    #[test]
    fn same_day_posts_share_a_separator() {
        let posts = vec![post("2", DAY + 20, "u1"), post("1", DAY + 10, "u1")];
        let rows = create_posts(&posts, 0, "u2", &Utc);
        assert_eq!(separators(&rows), 1);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn unread_marker_precedes_first_unseen_post_from_someone_else() {
        let posts = vec![post("2", 200, "u1"), post("1", 100, "u1")];
        let rows = create_posts(&posts, 150, "u2", &Utc);
        let marker = rows.iter().position(|row| *row == ListRow::NewMessages);
        let second = rows.iter().position(|row| row.post_id() == Some("2"));
        assert_eq!(marker.map(|index| index + 1), second);
        assert_eq!(rows.iter().filter(|row| **row == ListRow::NewMessages).count(), 1);
    }

    #[test]
    fn own_posts_do_not_get_the_unread_marker() {
        let posts = vec![post("2", 200, "u2"), post("1", 100, "u1")];
        let rows = create_posts(&posts, 150, "u2", &Utc);
        assert!(!rows.contains(&ListRow::NewMessages));
    }

    #[test]
    fn webhook_posts_count_as_someone_else() {
        let mut hook = post("2", 200, "u2");
        hook.from_webhook = true;
        let rows = create_posts(&[hook], 150, "u2", &Utc);
        assert!(rows.contains(&ListRow::NewMessages));
    }

    #[test]
    fn add_to_channel_prompts_are_skipped() {
        let mut prompt = post("2", 200, "u1");
        prompt.post_type = PostType::EphemeralAddToChannel;
        let rows = create_posts(&[prompt, post("1", 100, "u1")], 0, "u2", &Utc);
        assert!(rows.iter().all(|row| row.post_id() != Some("2")));
    }

    #[test]
    fn top_visible_post_skips_scrolled_off_rows() {
        let rows = vec![
            ListRow::DateSeparator(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            ListRow::Post("a".into()),
            ListRow::Post("b".into()),
        ];
        let heights = [1, 3, 3];
        assert_eq!(top_visible_post(&rows, &heights, 0), Some(1));
        assert_eq!(top_visible_post(&rows, &heights, 4), Some(2));
        assert_eq!(top_visible_post(&rows, &heights, 7), None);
    }

    #[test]
    fn separator_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(date_separator_label(today, today), "Today");
        assert_eq!(
            date_separator_label(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), today),
            "Yesterday"
        );
        assert_eq!(
            date_separator_label(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), today),
            "Tue, Jan 02, 2024"
        );
    }
}
