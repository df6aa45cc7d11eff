use chrono::{Days, NaiveDate};
use newsfeed_core::{
    make_comment, Article, ArticleId, DuplicateKey, MemoryNewsRepository, NewsRepository,
    RepoError, SqliteNewsRepository, Tag, User, ValidationError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Runs `scenario` once per backend on a fresh, empty store.
fn for_each_backend(scenario: impl Fn(&str, &dyn NewsRepository)) {
    let memory = MemoryNewsRepository::new();
    scenario("memory", &memory);

    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteNewsRepository::open(dir.path().join("contract.sqlite3")).unwrap();
    scenario("sqlite", &sqlite);
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 2, 1).unwrap() + Days::new(offset)
}

fn article(id: ArticleId, date: NaiveDate) -> Article {
    Article::new(
        date,
        format!("Title {id}"),
        format!("First paragraph {id}"),
        format!("https://news.example/{id}"),
        format!("https://img.example/{id}.jpg"),
    )
    .with_id(id)
}

fn ids(articles: &[Article]) -> Vec<ArticleId> {
    articles.iter().filter_map(|article| article.id).collect()
}

#[test]
fn empty_store_answers_every_query_with_a_miss() {
    for_each_backend(|backend, repo| {
        let query = article(1, day(0));
        assert_eq!(repo.get_number_of_articles().unwrap(), 0, "{backend}");
        assert_eq!(repo.get_first_article().unwrap(), None, "{backend}");
        assert_eq!(repo.get_last_article().unwrap(), None, "{backend}");
        assert_eq!(repo.get_article(1).unwrap(), None, "{backend}");
        assert!(repo.get_articles_by_date(None).unwrap().is_empty(), "{backend}");
        assert!(repo.get_articles_by_id(&[1, 2]).unwrap().is_empty(), "{backend}");
        assert!(repo.get_article_ids_for_tag("covid").unwrap().is_empty(), "{backend}");
        assert_eq!(repo.get_date_of_previous_article(&query).unwrap(), None, "{backend}");
        assert_eq!(repo.get_date_of_next_article(&query).unwrap(), None, "{backend}");
        assert_eq!(repo.get_user("nobody").unwrap(), None, "{backend}");
        assert!(repo.get_tags().unwrap().is_empty(), "{backend}");
        assert!(repo.get_comments().unwrap().is_empty(), "{backend}");
    });
}

#[test]
fn reverse_inserted_articles_come_back_in_date_order() {
    for_each_backend(|backend, repo| {
        for id in (1..=5).rev() {
            repo.add_article(&article(id, day(id as u64))).unwrap();
        }

        let all = repo.get_articles_by_date(None).unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3, 4, 5], "{backend}");
        assert_eq!(repo.get_number_of_articles().unwrap(), 5, "{backend}");
        assert_eq!(repo.get_first_article().unwrap().unwrap().id, Some(1), "{backend}");
        assert_eq!(repo.get_last_article().unwrap().unwrap().id, Some(5), "{backend}");
    });
}

#[test]
fn first_follows_natural_order_and_last_follows_greatest_id() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(7, day(1))).unwrap();
        repo.add_article(&article(3, day(5))).unwrap();
        repo.add_article(&article(9, day(1))).unwrap();

        assert_eq!(repo.get_first_article().unwrap().unwrap().id, Some(7), "{backend}");
        assert_eq!(repo.get_last_article().unwrap().unwrap().id, Some(9), "{backend}");
        let all = repo.get_articles_by_date(None).unwrap();
        assert_eq!(ids(&all), vec![7, 9, 3], "{backend}");
    });
}

#[test]
fn articles_by_date_match_exactly_including_boundaries() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(1, day(0))).unwrap();
        repo.add_article(&article(4, day(2))).unwrap();
        repo.add_article(&article(2, day(2))).unwrap();
        repo.add_article(&article(3, day(9))).unwrap();

        let first_day = repo.get_articles_by_date(Some(day(0))).unwrap();
        assert_eq!(ids(&first_day), vec![1], "{backend}");
        let middle = repo.get_articles_by_date(Some(day(2))).unwrap();
        assert_eq!(ids(&middle), vec![2, 4], "{backend}");
        let last_day = repo.get_articles_by_date(Some(day(9))).unwrap();
        assert_eq!(ids(&last_day), vec![3], "{backend}");

        for missing in [day(1), day(10), NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()] {
            assert!(
                repo.get_articles_by_date(Some(missing)).unwrap().is_empty(),
                "{backend} {missing}"
            );
        }
    });
}

#[test]
fn articles_by_id_keep_request_order_and_drop_unknown_ids() {
    for_each_backend(|backend, repo| {
        for id in 1..=3 {
            repo.add_article(&article(id, day(id as u64))).unwrap();
        }

        let found = repo.get_articles_by_id(&[1, 999, 3]).unwrap();
        assert_eq!(ids(&found), vec![1, 3], "{backend}");

        let reordered = repo.get_articles_by_id(&[3, 1, 3]).unwrap();
        assert_eq!(ids(&reordered), vec![3, 1], "{backend}");
        assert!(repo.get_articles_by_id(&[]).unwrap().is_empty(), "{backend}");
    });
}

#[test]
fn tagged_article_ids_are_ascending_and_unknown_tags_are_empty() {
    for_each_backend(|backend, repo| {
        for id in 1..=3 {
            repo.add_article(&article(id, day(0))).unwrap();
        }
        let mut covid = Tag::new("covid");
        covid.add_article(3);
        covid.add_article(1);
        repo.add_tag(&covid).unwrap();

        assert_eq!(repo.get_article_ids_for_tag("covid").unwrap(), vec![1, 3], "{backend}");
        assert!(repo.get_article_ids_for_tag("sport").unwrap().is_empty(), "{backend}");
        assert!(repo.get_article(1).unwrap().unwrap().is_tagged_by("covid"), "{backend}");
        assert!(!repo.get_article(2).unwrap().unwrap().is_tagged_by("covid"), "{backend}");
    });
}

#[test]
fn articles_added_with_tag_names_complete_the_tag_side() {
    for_each_backend(|backend, repo| {
        repo.add_tag(&Tag::new("health")).unwrap();
        let mut tagged = article(8, day(3));
        tagged.add_tag("health");
        repo.add_article(&tagged).unwrap();

        assert_eq!(repo.get_article_ids_for_tag("health").unwrap(), vec![8], "{backend}");
        let tags = repo.get_tags().unwrap();
        assert_eq!(tags.len(), 1, "{backend}");
        assert!(tags[0].is_applied_to(8), "{backend}");
    });
}

#[test]
fn duplicate_tag_names_resolve_to_the_first_tag() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(1, day(0))).unwrap();
        repo.add_article(&article(2, day(0))).unwrap();
        let mut first = Tag::new("covid");
        first.add_article(1);
        let mut second = Tag::new("covid");
        second.add_article(2);
        repo.add_tag(&first).unwrap();
        repo.add_tag(&second).unwrap();

        assert_eq!(repo.get_tags().unwrap().len(), 2, "{backend}");
        assert_eq!(repo.get_article_ids_for_tag("covid").unwrap(), vec![1], "{backend}");
    });
}

#[test]
fn stored_article_round_trips_field_for_field() {
    for_each_backend(|backend, repo| {
        repo.add_tag(&Tag::new("economy")).unwrap();
        repo.add_tag(&Tag::new("world")).unwrap();
        let mut original = article(42, day(17));
        original.add_tag("world");
        original.add_tag("economy");

        let id = repo.add_article(&original).unwrap();

        assert_eq!(id, 42, "{backend}");
        assert_eq!(repo.get_article(42).unwrap(), Some(original.clone()), "{backend}");
    });
}

#[test]
fn missing_article_ids_are_assigned_after_the_greatest_id() {
    for_each_backend(|backend, repo| {
        let first = repo
            .add_article(&Article::new(day(0), "a", "b", "c", "d"))
            .unwrap();
        repo.add_article(&article(10, day(0))).unwrap();
        let next = repo
            .add_article(&Article::new(day(0), "a", "b", "c", "d"))
            .unwrap();

        assert_eq!((first, next), (1, 11), "{backend}");
        assert_eq!(repo.get_article(11).unwrap().unwrap().id, Some(11), "{backend}");
    });
}

#[test]
fn duplicate_keys_are_rejected_without_side_effects() {
    for_each_backend(|backend, repo| {
        repo.add_user(&User::new("thorke", "hash")).unwrap();
        repo.add_article(&article(1, day(0))).unwrap();

        let user_err = repo.add_user(&User::new("thorke", "other")).unwrap_err();
        assert!(
            matches!(user_err, RepoError::DuplicateKey(DuplicateKey::UserName(ref name)) if name == "thorke"),
            "{backend}: {user_err}"
        );
        let article_err = repo.add_article(&article(1, day(4))).unwrap_err();
        assert!(
            matches!(article_err, RepoError::DuplicateKey(DuplicateKey::ArticleId(1))),
            "{backend}: {article_err}"
        );

        assert_eq!(repo.get_user("thorke").unwrap().unwrap().password, "hash", "{backend}");
        assert_eq!(repo.get_number_of_articles().unwrap(), 1, "{backend}");
        assert_eq!(repo.get_article(1).unwrap().unwrap().date, day(0), "{backend}");
    });
}

#[test]
fn article_with_unknown_tag_name_is_rejected() {
    for_each_backend(|backend, repo| {
        let mut tagged = article(1, day(0));
        tagged.add_tag("ghost");

        let err = repo.add_article(&tagged).unwrap_err();

        assert!(
            matches!(err, RepoError::Validation(ValidationError::UnknownTag(ref name)) if name == "ghost"),
            "{backend}: {err}"
        );
        assert_eq!(repo.get_number_of_articles().unwrap(), 0, "{backend}");
    });
}

#[test]
fn tag_naming_an_unknown_article_is_rejected_without_writes() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(1, day(0))).unwrap();
        let mut tag = Tag::new("covid");
        tag.add_article(1);
        tag.add_article(999);

        let err = repo.add_tag(&tag).unwrap_err();

        assert!(
            matches!(err, RepoError::Validation(ValidationError::UnknownArticle(999))),
            "{backend}: {err}"
        );
        assert!(repo.get_tags().unwrap().is_empty(), "{backend}");
        assert!(repo.get_article(1).unwrap().unwrap().tags.is_empty(), "{backend}");
    });
}

#[test]
fn records_carrying_comments_are_rejected() {
    for_each_backend(|backend, repo| {
        let stored = article(1, day(0));
        repo.add_article(&stored).unwrap();
        let author = User::new("fmercury", "hash");
        let timestamp = day(0).and_hms_opt(8, 0, 0).unwrap();
        let comment = make_comment("first!", &author, &stored, timestamp);

        let mut user = author.clone();
        user.comments.push(comment.clone());
        let mut other = article(2, day(1));
        other.comments.push(comment);

        assert!(
            matches!(repo.add_user(&user), Err(RepoError::Validation(ValidationError::UnexpectedComments))),
            "{backend}"
        );
        assert!(
            matches!(repo.add_article(&other), Err(RepoError::Validation(ValidationError::UnexpectedComments))),
            "{backend}"
        );
        assert_eq!(repo.get_user("fmercury").unwrap(), None, "{backend}");
        assert_eq!(repo.get_number_of_articles().unwrap(), 1, "{backend}");
    });
}

#[test]
fn invalid_comments_leave_every_collection_untouched() {
    for_each_backend(|backend, repo| {
        let stored = article(1, day(0));
        repo.add_article(&stored).unwrap();
        let author = User::new("thorke", "hash");
        repo.add_user(&author).unwrap();
        let stranger = User::new("stranger", "hash");
        let unsaved = article(77, day(0));
        let timestamp = day(0).and_hms_opt(9, 30, 0).unwrap();

        let mut no_user = make_comment("text", &author, &stored, timestamp);
        no_user.user_name = None;
        let cases = [
            (
                make_comment("   ", &author, &stored, timestamp),
                ValidationError::EmptyCommentText,
            ),
            (no_user, ValidationError::MissingCommentUser),
            (
                make_comment("text", &author, &Article::new(day(0), "a", "b", "c", "d"), timestamp),
                ValidationError::MissingCommentArticle,
            ),
            (
                make_comment("text", &stranger, &stored, timestamp),
                ValidationError::UnknownUser("stranger".to_string()),
            ),
            (
                make_comment("text", &author, &unsaved, timestamp),
                ValidationError::UnknownArticle(77),
            ),
        ];

        for (comment, expected) in cases {
            match repo.add_comment(&comment) {
                Err(RepoError::Validation(actual)) => assert_eq!(actual, expected, "{backend}"),
                other => panic!("{backend}: expected {expected}, got {other:?}"),
            }
            assert!(repo.get_comments().unwrap().is_empty(), "{backend}");
            assert!(repo.get_user("thorke").unwrap().unwrap().comments.is_empty(), "{backend}");
            assert!(repo.get_article(1).unwrap().unwrap().comments.is_empty(), "{backend}");
        }
    });
}

#[test]
fn valid_comment_is_visible_from_user_article_and_comment_list() {
    for_each_backend(|backend, repo| {
        let stored = article(1, day(0));
        repo.add_article(&stored).unwrap();
        let author = User::new("thorke", "hash");
        repo.add_user(&author).unwrap();
        let first = make_comment("Nice article", &author, &stored, day(0).and_hms_opt(9, 30, 0).unwrap());
        let second = make_comment("Agreed", &author, &stored, day(1).and_hms_opt(7, 0, 0).unwrap());

        repo.add_comment(&first).unwrap();
        repo.add_comment(&second).unwrap();

        let expected = vec![first.clone(), second.clone()];
        assert_eq!(repo.get_comments().unwrap(), expected, "{backend}");
        assert_eq!(repo.get_user("thorke").unwrap().unwrap().comments, expected, "{backend}");
        assert_eq!(repo.get_article(1).unwrap().unwrap().comments, expected, "{backend}");
    });
}

fn reference_neighbours(
    dates: &BTreeSet<NaiveDate>,
    query: NaiveDate,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    if !dates.contains(&query) {
        return (None, None);
    }
    let previous = dates.iter().filter(|date| **date < query).max().copied();
    let next = dates.iter().filter(|date| **date > query).min().copied();
    (previous, next)
}

#[test]
fn previous_and_next_dates_match_a_linear_scan() {
    for_each_backend(|backend, repo| {
        let mut rng = StdRng::seed_from_u64(0xa27c1e);
        let mut dates = BTreeSet::new();
        for id in 1..=60 {
            let date = day(rng.gen_range(0..45));
            dates.insert(date);
            repo.add_article(&article(id, date)).unwrap();
        }

        for offset in 0..50 {
            let query = article(0, day(offset));
            let (previous, next) = reference_neighbours(&dates, query.date);
            assert_eq!(
                repo.get_date_of_previous_article(&query).unwrap(),
                previous,
                "{backend} previous of {}",
                query.date
            );
            assert_eq!(
                repo.get_date_of_next_article(&query).unwrap(),
                next,
                "{backend} next of {}",
                query.date
            );
        }
    });
}

#[test]
fn random_inserts_match_a_linear_scan_reference() {
    for_each_backend(|backend, repo| {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reference: Vec<Article> = Vec::new();
        let mut pending: Vec<ArticleId> = (1..=80).collect();
        while !pending.is_empty() {
            let id = pending.swap_remove(rng.gen_range(0..pending.len()));
            let stored = article(id, day(rng.gen_range(0..20)));
            repo.add_article(&stored).unwrap();
            reference.push(stored);
        }
        reference.sort_by(Article::natural_cmp);

        assert_eq!(repo.get_articles_by_date(None).unwrap(), reference, "{backend}");
        for offset in 0..21 {
            let expected: Vec<Article> = reference
                .iter()
                .filter(|article| article.date == day(offset))
                .cloned()
                .collect();
            assert_eq!(
                repo.get_articles_by_date(Some(day(offset))).unwrap(),
                expected,
                "{backend} {}",
                day(offset)
            );
        }
    });
}

#[test]
fn lookup_of_more_ids_than_sqlite_parameters_still_succeeds() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(1, day(0))).unwrap();
        repo.add_article(&article(39_999, day(1))).unwrap();
        let mut requested: Vec<ArticleId> = (1..=40_000).rev().collect();
        requested.push(1);

        let found = repo.get_articles_by_id(&requested).unwrap();

        assert_eq!(ids(&found), vec![39_999, 1], "{backend}");
    });
}

#[test]
fn dates_outside_four_digit_years_keep_chronological_order() {
    for_each_backend(|backend, repo| {
        let far_future = NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap();
        let modern = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let antiquity = NaiveDate::from_ymd_opt(-44, 3, 15).unwrap();
        repo.add_article(&article(1, far_future)).unwrap();
        repo.add_article(&article(2, modern)).unwrap();
        repo.add_article(&article(3, antiquity)).unwrap();

        let all = repo.get_articles_by_date(None).unwrap();
        assert_eq!(ids(&all), vec![3, 2, 1], "{backend}");
        assert_eq!(repo.get_first_article().unwrap().unwrap().id, Some(3), "{backend}");
        let middle = article(0, modern);
        assert_eq!(
            repo.get_date_of_previous_article(&middle).unwrap(),
            Some(antiquity),
            "{backend}"
        );
        assert_eq!(
            repo.get_date_of_next_article(&middle).unwrap(),
            Some(far_future),
            "{backend}"
        );
        assert_eq!(
            ids(&repo.get_articles_by_date(Some(far_future)).unwrap()),
            vec![1],
            "{backend}"
        );
    });
}

#[test]
fn exhausted_id_space_is_reported_the_same_way_by_both_backends() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(ArticleId::MAX, day(0))).unwrap();

        let err = repo
            .add_article(&Article::new(day(1), "a", "b", "c", "d"))
            .unwrap_err();

        assert!(
            matches!(err, RepoError::Validation(ValidationError::IdSpaceExhausted)),
            "{backend}: {err}"
        );
        assert_eq!(repo.get_number_of_articles().unwrap(), 1, "{backend}");
        assert_eq!(repo.add_article(&article(5, day(1))).unwrap(), 5, "{backend}");
    });
}

#[test]
fn assigned_ids_never_drop_below_one() {
    for_each_backend(|backend, repo| {
        repo.add_article(&article(-7, day(0))).unwrap();

        let assigned = repo
            .add_article(&Article::new(day(0), "a", "b", "c", "d"))
            .unwrap();

        assert_eq!(assigned, 1, "{backend}");
    });
}
