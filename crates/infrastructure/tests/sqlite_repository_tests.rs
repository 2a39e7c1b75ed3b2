use std::sync::Arc;

use datamover_domain::entities::{
    JobProtocol, JobStatus, JobType, Listing, NewElement, NewJob, StatEntry,
};
use datamover_domain::repositories::JobRepository;
use datamover_domain::selection::SelectionAlgorithm;
use datamover_errors::DatamoverError;
use datamover_infrastructure::SqliteJobRepository;

fn new_job(job_type: JobType, priority: i64) -> NewJob {
    NewJob {
        job_type,
        priority,
        protocol: JobProtocol::Gridftp,
        src_siteid: Some(1),
        src_filepath: Some("/data/source".to_string()),
        dst_siteid: job_type.requires_destination().then_some(2),
        dst_filepath: job_type
            .requires_destination()
            .then(|| "/data/backup".to_string()),
        extra_opts: None,
        src_credentials: None,
        dst_credentials: None,
        max_tries: 2,
    }
}

async fn repo() -> SqliteJobRepository {
    SqliteJobRepository::in_memory().await.unwrap()
}

#[tokio::test]
async fn test_create_job_creates_seed_element() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::Copy, 5)).await.unwrap();

    assert_eq!(job.user_id, 10);
    assert_eq!(job.status, JobStatus::New);
    assert!(!job.log_uid.is_empty());

    let elements = repo.get_elements(job.id, 10).await.unwrap();
    assert_eq!(elements.len(), 1);
    let seed = &elements[0];
    assert_eq!(seed.element_id, 0);
    // COPY作业先派一次LIST侦察
    assert_eq!(seed.element_type, JobType::List);
    assert_eq!(seed.src_filepath, "/data/source");
    assert_eq!(seed.attempts, 0);
    assert_eq!(seed.status, JobStatus::New);
}

#[tokio::test]
async fn test_mkdir_seed_is_directly_executable() {
    let repo = repo().await;
    let job = repo
        .create_job(10, new_job(JobType::Mkdir, 5))
        .await
        .unwrap();
    let seed = repo.get_element(job.id, 0, 10).await.unwrap();
    assert_eq!(seed.element_type, JobType::Mkdir);
}

#[tokio::test]
async fn test_submission_validation_rejects_shell_metacharacters() {
    let repo = repo().await;
    let mut bad = new_job(JobType::List, 5);
    bad.src_filepath = Some("/data; rm -rf /".to_string());
    let err = repo.create_job(10, bad).await.unwrap_err();
    assert!(matches!(err, DatamoverError::Validation(_)));
    assert!(repo.get_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_jobs_are_user_scoped() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();

    let err = repo.get_job(job.id, 99).await.unwrap_err();
    assert!(matches!(err, DatamoverError::JobNotFound { .. }));
    let err = repo.get_elements(job.id, 99).await.unwrap_err();
    assert!(matches!(err, DatamoverError::JobNotFound { .. }));
    assert!(repo.get_jobs(99).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_claim_marks_submitted_and_issues_tokens() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();

    let claimed = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::default())
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job.id, job.id);
    assert_eq!(claimed[0].job.status, JobStatus::Submitted);
    assert_eq!(claimed[0].elements.len(), 1);
    let element = &claimed[0].elements[0];
    assert_eq!(element.status, JobStatus::Submitted);
    assert!(element.token.is_some());

    // 已领取的元素不会被第二次领走
    let again = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::default())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_claim_respects_priority_ordering() {
    let repo = repo().await;
    let low = repo.create_job(10, new_job(JobType::List, 7)).await.unwrap();
    let high = repo.create_job(10, new_job(JobType::List, 2)).await.unwrap();

    let claimed = repo
        .claim_elements(
            &[JobType::List],
            SelectionAlgorithm::ByNumber { limit: 1 },
        )
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job.id, high.id);

    let low_seed = repo.get_element(low.id, 0, 10).await.unwrap();
    assert_eq!(low_seed.status, JobStatus::New);
}

#[tokio::test]
async fn test_claim_filters_by_requested_types() {
    let repo = repo().await;
    repo.create_job(10, new_job(JobType::Mkdir, 5)).await.unwrap();

    let claimed = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::default())
        .await
        .unwrap();
    assert!(claimed.is_empty());

    let claimed = repo
        .claim_elements(&[JobType::Mkdir], SelectionAlgorithm::default())
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
}

#[tokio::test]
async fn test_by_size_claims_within_budget() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::Copy, 5)).await.unwrap();

    // 种子已完成，队列里只剩展开出来的传输元素
    let mut seed = repo.get_element(job.id, 0, 10).await.unwrap();
    seed.attempts = 1;
    seed.status = JobStatus::Done;
    repo.update_element(&seed).await.unwrap();

    repo.add_elements(
        job.id,
        vec![
            copy_element("/data/source/big.bin", 200),
            copy_element("/data/source/small.bin", 50),
            copy_element("/data/source/medium.bin", 80),
        ],
    )
    .await
    .unwrap();

    let claimed = repo
        .claim_elements(
            &[JobType::Copy],
            SelectionAlgorithm::BySize {
                size_budget: 150,
                list_limit: 20,
            },
        )
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let sizes: Vec<i64> = claimed[0].elements.iter().map(|e| e.size).collect();
    // 200超预算被跳过，80和50装入(size降序扫描)
    assert_eq!(sizes, vec![80, 50]);
}

#[tokio::test]
async fn test_exhausted_elements_are_not_claimable() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();

    let mut seed = repo.get_element(job.id, 0, 10).await.unwrap();
    seed.attempts = seed.max_tries;
    seed.status = JobStatus::Failed;
    repo.update_element(&seed).await.unwrap();

    let claimed = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::default())
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn test_update_element_rejects_attempts_beyond_max_tries() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();

    let mut seed = repo.get_element(job.id, 0, 10).await.unwrap();
    seed.attempts = seed.max_tries + 1;
    let err = repo.update_element(&seed).await.unwrap_err();
    assert!(matches!(err, DatamoverError::RetriesExhausted { .. }));

    // 存储里的元素没有被改动
    let unchanged = repo.get_element(job.id, 0, 10).await.unwrap();
    assert_eq!(unchanged.attempts, 0);
}

#[tokio::test]
async fn test_update_element_persists_listing() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();

    let mut seed = repo.get_element(job.id, 0, 10).await.unwrap();
    seed.attempts = 1;
    seed.status = JobStatus::Done;
    let mut listing = Listing::new();
    listing.insert(
        "/data/source".to_string(),
        vec![StatEntry {
            st_mode: 0o100644,
            st_uid: 0,
            st_gid: 0,
            st_size: 42,
            st_mtime: 0,
            st_nlink: 1,
            name: "a.txt".to_string(),
        }],
    );
    seed.listing = Some(listing);
    repo.update_element(&seed).await.unwrap();

    let stored = repo.get_element(job.id, 0, 10).await.unwrap();
    let listing = stored.listing.unwrap();
    assert_eq!(listing["/data/source"][0].name, "a.txt");
    assert_eq!(listing["/data/source"][0].st_size, 42);
}

#[tokio::test]
async fn test_recompute_job_status_aggregates_elements() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::Copy, 5)).await.unwrap();

    let mut seed = repo.get_element(job.id, 0, 10).await.unwrap();
    seed.attempts = 1;
    seed.status = JobStatus::Done;
    repo.update_element(&seed).await.unwrap();
    assert_eq!(
        repo.recompute_job_status(job.id).await.unwrap(),
        JobStatus::Done
    );

    let added = repo
        .add_elements(job.id, vec![copy_element("/data/source/a.txt", 10)])
        .await
        .unwrap();
    let mut element = added[0].clone();
    element.attempts = 1;
    element.status = JobStatus::Failed;
    repo.update_element(&element).await.unwrap();

    // {DONE, FAILED} -> FAILED
    assert_eq!(
        repo.recompute_job_status(job.id).await.unwrap(),
        JobStatus::Failed
    );
    let job = repo.get_job(job.id, 10).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_add_elements_assigns_sequential_ids() {
    let repo = repo().await;
    let job = repo.create_job(10, new_job(JobType::Copy, 5)).await.unwrap();

    let added = repo
        .add_elements(
            job.id,
            vec![
                copy_element("/data/source/a.txt", 1),
                copy_element("/data/source/b.txt", 2),
            ],
        )
        .await
        .unwrap();
    let ids: Vec<i64> = added.iter().map(|e| e.element_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let more = repo
        .add_elements(job.id, vec![copy_element("/data/source/c.txt", 3)])
        .await
        .unwrap();
    assert_eq!(more[0].element_id, 3);
}

#[tokio::test]
async fn test_concurrent_claims_do_not_overlap() {
    let repo = Arc::new(repo().await);
    for _ in 0..6 {
        repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();
    }

    let a = Arc::clone(&repo);
    let b = Arc::clone(&repo);
    let (first, second) = tokio::join!(
        a.claim_elements(&[JobType::List], SelectionAlgorithm::ByNumber { limit: 3 }),
        b.claim_elements(&[JobType::List], SelectionAlgorithm::ByNumber { limit: 3 }),
    );

    let mut keys: Vec<(i64, i64)> = first
        .unwrap()
        .iter()
        .chain(second.unwrap().iter())
        .flat_map(|c| c.elements.iter().map(|e| (e.job_id, e.element_id)))
        .collect();
    let total = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), total, "同一元素被领取了两次");
    assert_eq!(total, 6);
}

fn copy_element(src: &str, size: i64) -> NewElement {
    NewElement {
        element_type: JobType::Copy,
        src_filepath: src.to_string(),
        dst_filepath: Some(format!("/data/backup/{}", src.rsplit('/').next().unwrap())),
        size,
        max_tries: 2,
    }
}

#[tokio::test]
async fn test_by_number_scan_stops_at_limit_without_losing_the_rest() {
    let repo = repo().await;
    for _ in 0..5 {
        repo.create_job(10, new_job(JobType::List, 5)).await.unwrap();
    }

    let first = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::ByNumber { limit: 2 })
        .await
        .unwrap();
    let claimed: usize = first.iter().map(|c| c.elements.len()).sum();
    assert_eq!(claimed, 2);

    // 超出本批上限的候选留在队列里，下一批照常领到
    let second = repo
        .claim_elements(&[JobType::List], SelectionAlgorithm::ByNumber { limit: 10 })
        .await
        .unwrap();
    let remaining: usize = second.iter().map(|c| c.elements.len()).sum();
    assert_eq!(remaining, 3);
}
