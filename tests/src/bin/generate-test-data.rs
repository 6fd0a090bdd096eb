//! Prints a live feed replay: one JSON comment per line, shuffled, with duplicates

use chrono::{Duration, TimeZone, Utc};
use commenthub_api::{Comment, CommentId};
use rand::{seq::SliceRandom, Rng};

const NUM_TOP_LEVEL: u64 = 40;
const NUM_REPLIES: u64 = 160;
const DUPLICATE_RATIO: f64 = 0.1;

const MAX_TEXT_WORDS: usize = 30;
const USERNAMES: &[&str] = &["alice", "bob", "carol", "dave", "eve", "mallory"];

fn gen_text(rng: &mut impl Rng) -> String {
    let words = lipsum::lipsum_words(rng.gen_range(1..MAX_TEXT_WORDS));
    // sprinkle some of the allowed markup
    match rng.gen_range(0..4) {
        0 => format!("<strong>{words}</strong>"),
        1 => format!("{words} <code>x = 1</code>"),
        2 => format!("<i>{words}</i> <a href=\"https://example.org\" title=\"ex\">link</a>"),
        _ => words,
    }
}

fn main() {
    let mut rng = rand::thread_rng();
    let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();

    let mut comments = Vec::new();
    for id in 1..=(NUM_TOP_LEVEL + NUM_REPLIES) {
        let parent = match id <= NUM_TOP_LEVEL {
            true => None,
            false => Some(CommentId(rng.gen_range(1..id))),
        };
        let username = USERNAMES[rng.gen_range(0..USERNAMES.len())];
        comments.push(Comment {
            id: CommentId(id),
            parent,
            username: String::from(username),
            email: format!("{username}@example.org"),
            homepage: rng
                .gen_bool(0.2)
                .then(|| format!("https://{username}.example.org")),
            text: gen_text(&mut rng),
            image: None,
            file: None,
            created_at: start + Duration::seconds(id as i64 * 7),
            replies: Vec::new(),
        });
    }

    let duplicates = comments
        .choose_multiple(&mut rng, (comments.len() as f64 * DUPLICATE_RATIO) as usize)
        .cloned()
        .collect::<Vec<_>>();
    comments.extend(duplicates);
    comments.shuffle(&mut rng);

    for c in comments {
        println!(
            "{}",
            serde_json::to_string(&c).expect("serializing a comment never fails")
        );
    }
}
