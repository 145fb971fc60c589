//! PostgreSQL repository tests.
//!
//! Require a migrated database with the pgvector extension. Run with
//! `cargo test -p lumen-db -- --ignored`; `DATABASE_URL` overrides the default.

use chrono::{TimeZone, Utc};
use lumen_db::{
    defaults, BoundingBox, Collection, Database, Error, FaceRepository, NewFace, NewPhoto, PersonRepository,
    PhotoRepository, PhotoSearchRepository, QueueRepository, QueueStatus, SearchCriteria,
    TagRepository, TaskType, Vector, VectorIndex, VectorMetadata, DEFAULT_TEST_DATABASE_URL,
};

async fn setup_test_db() -> Database {
    let _ = dotenvy::dotenv();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn suffix() -> String {
    Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn unique_path(name: &str) -> String {
    format!("/test/{}/{}", suffix(), name)
}

fn face_at(photo_id: i64) -> NewFace {
    NewFace {
        photo_id,
        bbox: BoundingBox::new(0.1, 0.2, 0.3, 0.4),
        confidence: 0.97,
        age_estimate: Some(30),
        gender_estimate: None,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_queue_lifecycle_commits_photo_update() {
    let db = setup_test_db().await;
    let photo = db
        .photos
        .insert(NewPhoto::new(unique_path("lifecycle.jpg")))
        .await
        .unwrap();

    let id = db.queue.enqueue(photo.id, TaskType::Full, 3).await.unwrap();
    let item = db.queue.mark_processing(id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Processing);
    assert!(item.started_at.is_some());

    let mut update = photo.processing_update();
    update.is_processed = true;
    update.has_embeddings = true;
    db.queue.complete(id, Some(&update)).await.unwrap();

    let stored = PhotoRepository::get(&db.photos, photo.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_processed);
    assert!(stored.has_embeddings);

    let err = db.queue.mark_processing(id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_person_merge_recounts_photos() {
    let db = setup_test_db().await;
    let p1 = db
        .photos
        .insert(NewPhoto::new(unique_path("m1.jpg")))
        .await
        .unwrap();
    let p2 = db
        .photos
        .insert(NewPhoto::new(unique_path("m2.jpg")))
        .await
        .unwrap();
    let f1 = FaceRepository::insert(&db.faces, face_at(p1.id)).await.unwrap();
    let f2 = FaceRepository::insert(&db.faces, face_at(p2.id)).await.unwrap();

    let a = db.people.create_for_face(&f1).await.unwrap();
    let b = db.people.create_for_face(&f2).await.unwrap();
    assert_eq!(a.photo_count, 1);

    let merged = db.people.merge(a.id, b.id).await.unwrap();
    assert_eq!(merged.photo_count, 2);
    assert!(PersonRepository::get(&db.people, b.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(db.people.photo_ids(a.id).await.unwrap(), vec![p1.id, p2.id]);

    PersonRepository::delete(&db.people, a.id).await.unwrap();
    let f1 = FaceRepository::get(&db.faces, f1.id).await.unwrap().unwrap();
    assert_eq!(f1.person_id, None);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_filter_by_tag_and_city() {
    let db = setup_test_db().await;
    let city = format!("Lisbon-{}", suffix());
    let photo = db
        .photos
        .insert(
            NewPhoto::new(unique_path("tram.jpg"))
                .taken_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
                .located(None, Some(&city), Some("Portugal")),
        )
        .await
        .unwrap();
    let tag = db.tags.get_or_create("tram", Some("object")).await.unwrap();
    assert!(db.tags.link_photo(photo.id, tag.id).await.unwrap());
    assert!(!db.tags.link_photo(photo.id, tag.id).await.unwrap());

    let criteria = SearchCriteria::new()
        .with_tag_names(["tram"])
        .with_city(city.to_lowercase());
    let found = db.search.filter(&criteria, 10, 0).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, photo.id);

    let ids = db
        .search
        .filter_ids(&[photo.id, -1], &SearchCriteria::new().with_is_video(true))
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_vector_index_nearest_first() {
    let db = setup_test_db().await;
    let photo = db
        .photos
        .insert(NewPhoto::new(unique_path("vec.jpg")))
        .await
        .unwrap();

    let mut a = vec![0.0f32; 512];
    a[0] = 1.0;
    let mut b = vec![0.0f32; 512];
    b[1] = 1.0;
    let id_a = format!("test-a-{}", suffix());
    let id_b = format!("test-b-{}", suffix());

    db.vectors
        .upsert(Collection::Face, &id_a, &Vector::from(a.clone()), VectorMetadata::face(photo.id, 1))
        .await
        .unwrap();
    db.vectors
        .upsert(Collection::Face, &id_b, &Vector::from(b), VectorMetadata::face(photo.id, 2))
        .await
        .unwrap();

    let hits = db
        .vectors
        .query(Collection::Face, &Vector::from(a), 1)
        .await
        .unwrap();
    assert_eq!(hits[0].id, id_a);
    assert!(hits[0].distance < 1e-4);

    db.vectors.delete(Collection::Face, &id_a).await.unwrap();
    db.vectors.delete(Collection::Face, &id_b).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_vector_query_past_ef_ceiling_is_exact() {
    let db = setup_test_db().await;
    let photo = db
        .photos
        .insert(NewPhoto::new(unique_path("exact.jpg")))
        .await
        .unwrap();

    let mut near = vec![0.0f32; 512];
    near[3] = 1.0;
    let mut far = vec![0.0f32; 512];
    far[3] = -1.0;
    let id_near = format!("test-near-{}", suffix());
    let id_far = format!("test-far-{}", suffix());
    db.vectors
        .upsert(Collection::Image, &id_near, &Vector::from(near.clone()), VectorMetadata::image(photo.id))
        .await
        .unwrap();
    db.vectors
        .upsert(Collection::Image, &id_far, &Vector::from(far), VectorMetadata::image(photo.id))
        .await
        .unwrap();

    let hits = db
        .vectors
        .query(Collection::Image, &Vector::from(near), defaults::HNSW_EF_SEARCH_MAX + 1)
        .await
        .unwrap();
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(hits[0].id, id_near);
    assert!(hits.iter().any(|h| h.id == id_far));

    db.vectors.delete(Collection::Image, &id_near).await.unwrap();
    db.vectors.delete(Collection::Image, &id_far).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_requeue_for_reprocess_clears_video_state() {
    let db = setup_test_db().await;
    let video = db
        .photos
        .insert(NewPhoto::new(unique_path("clip.mp4")).video())
        .await
        .unwrap();
    let done = db.queue.enqueue(video.id, TaskType::Full, 0).await.unwrap();
    db.queue.mark_processing(done).await.unwrap();
    let mut update = video.processing_update();
    update.is_processed = true;
    update.thumbnail_small = Some("t/clip_200.jpg".into());
    db.queue.complete(done, Some(&update)).await.unwrap();

    let fresh = db
        .queue
        .requeue_for_reprocess(video.id, TaskType::Full, 1)
        .await
        .unwrap();

    let stored = PhotoRepository::get(&db.photos, video.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_processed);
    assert!(!stored.has_thumbnail());
    let items = QueueRepository::list_for_photo(&db.queue, video.id)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, fresh);
    assert_eq!(items[0].priority, 1);
    assert!(db.photos.list_video_ids().await.unwrap().contains(&video.id));

    let stats = db.search.library_stats().await.unwrap();
    assert!(stats.total_videos >= 1);
    assert_eq!(
        stats.processed_count + stats.unprocessed_count,
        stats.total_photos + stats.total_videos
    );

    assert!(matches!(
        db.queue.requeue_for_reprocess(-1, TaskType::Full, 1).await,
        Err(Error::PhotoNotFound(-1))
    ));
}
