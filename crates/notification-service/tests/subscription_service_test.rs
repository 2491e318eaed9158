//! SubscriptionService 集成测试
//!
//! 使用内存订阅仓储验证订阅唯一性、自订阅拒绝与键集分页。

use std::collections::HashSet;
use std::sync::Arc;

use herald_notifications::error::NotificationError;
use herald_notifications::repository::{
    InMemorySubscriptionRepository, SubscriptionRepositoryTrait,
};
use herald_notifications::service::SubscriptionService;
use tonic::Code;
use uuid::Uuid;

fn setup() -> (
    Arc<InMemorySubscriptionRepository>,
    SubscriptionService<InMemorySubscriptionRepository>,
) {
    let repo = Arc::new(InMemorySubscriptionRepository::new());
    let service = SubscriptionService::new(repo.clone());
    (repo, service)
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe() {
    let (repo, service) = setup();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let subscription = service.subscribe(&a.to_string(), &b.to_string()).await.unwrap();
    assert_eq!(subscription.subscriber_id, a);
    assert_eq!(subscription.target_id, b);
    assert_eq!(repo.list_subscribers_of(b).await.unwrap(), vec![a]);

    service.unsubscribe(&a.to_string(), &b.to_string()).await.unwrap();
    assert!(repo.is_empty());

    let err = service
        .unsubscribe(&a.to_string(), &b.to_string())
        .await
        .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), Code::NotFound);
}

#[tokio::test]
async fn test_duplicate_subscription_keeps_single_row() {
    let (repo, service) = setup();
    let (a, b) = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string());

    service.subscribe(&a, &b).await.unwrap();
    let err = service.subscribe(&a, &b).await.unwrap_err();

    assert!(matches!(err, NotificationError::AlreadySubscribed { .. }));
    assert_eq!(tonic::Status::from(err).code(), Code::AlreadyExists);
    assert_eq!(repo.len(), 1);
}

#[tokio::test]
async fn test_self_subscription_writes_nothing() {
    let (repo, service) = setup();
    let user = Uuid::new_v4().to_string();

    let err = service.subscribe(&user, &user).await.unwrap_err();

    assert!(matches!(err, NotificationError::InvalidActor(_)));
    assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);
    assert!(repo.is_empty());
}

#[tokio::test]
async fn test_list_subscribers_walks_all_pages() {
    let (_repo, service) = setup();
    let target = Uuid::new_v4().to_string();
    let mut expected = HashSet::new();
    for _ in 0..45 {
        let subscriber = Uuid::new_v4();
        service.subscribe(&subscriber.to_string(), &target).await.unwrap();
        expected.insert(subscriber);
    }

    let mut seen = HashSet::new();
    let mut page_sizes = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = service
            .list_subscribers(&target, cursor.as_deref(), None)
            .await
            .unwrap();
        page_sizes.push(page.subscriptions.len());
        for s in &page.subscriptions {
            assert!(seen.insert(s.subscriber_id), "分页结果不应重复");
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(page_sizes, vec![20, 20, 5]);
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_list_subscribers_limit_is_clamped() {
    let (_repo, service) = setup();
    let target = Uuid::new_v4().to_string();
    for _ in 0..3 {
        service
            .subscribe(&Uuid::new_v4().to_string(), &target)
            .await
            .unwrap();
    }

    let page = service
        .list_subscribers(&target, None, Some(0))
        .await
        .unwrap();
    assert_eq!(page.subscriptions.len(), 1);
    assert!(page.next_cursor.is_some());

    let page = service
        .list_subscribers(&target, None, Some(10_000))
        .await
        .unwrap();
    assert_eq!(page.subscriptions.len(), 3);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_list_subscribers_rejects_malformed_cursor() {
    let (_repo, service) = setup();

    let err = service
        .list_subscribers(&Uuid::new_v4().to_string(), Some("not-a-cursor"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, NotificationError::InvalidCursor(_)));
    assert_eq!(tonic::Status::from(err).code(), Code::InvalidArgument);
}
