//! NotificationService 集成测试
//!
//! 通过扇出管道写入通知，再经服务层读取和修改，验证缓存一致性与所有权校验。

use std::sync::Arc;
use std::time::Duration;

use herald_notifications::cache::InMemoryNotificationCache;
use herald_notifications::error::NotificationError;
use herald_notifications::fanout::{AudienceResolver, FanoutPipeline};
use herald_notifications::repository::{
    InMemoryNotificationRepository, InMemorySubscriptionRepository, SubscriptionRepositoryTrait,
};
use herald_notifications::service::NotificationService;
use herald_shared::events::ActivityEvent;
use tonic::Code;
use uuid::Uuid;

struct Fixture {
    subscriptions: Arc<InMemorySubscriptionRepository>,
    notifications: Arc<InMemoryNotificationRepository>,
    cache: Arc<InMemoryNotificationCache>,
    service: NotificationService<InMemoryNotificationRepository, InMemoryNotificationCache>,
    pipeline: FanoutPipeline<
        InMemorySubscriptionRepository,
        InMemoryNotificationRepository,
        InMemoryNotificationCache,
    >,
}

fn fixture() -> Fixture {
    let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
    let notifications = Arc::new(InMemoryNotificationRepository::new());
    let cache = Arc::new(InMemoryNotificationCache::new());

    Fixture {
        service: NotificationService::new(notifications.clone(), cache.clone()),
        pipeline: FanoutPipeline::new(
            AudienceResolver::new(subscriptions.clone()),
            notifications.clone(),
            cache.clone(),
        ),
        subscriptions,
        notifications,
        cache,
    }
}

impl Fixture {
    /// user 订阅 actor，actor 产生 n 次活动
    async fn notify(&self, user: Uuid, actor: Uuid, n: usize) {
        if self.subscriptions.get(user, actor).await.unwrap().is_none() {
            self.subscriptions.create(user, actor).await.unwrap();
        }
        for i in 0..n {
            self.pipeline
                .handle_payload(&ActivityEvent::new(actor, format!("like-{i}")).to_payload())
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_list_populates_cache_and_fanout_invalidates_it() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 2).await;

    let first = f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(f.cache.contains(user));

    // 新的扇出之后，下一次读取必须看到新通知
    f.notify(user, actor, 1).await;
    assert!(!f.cache.contains(user));

    let second = f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(second.len(), 3);
}

#[tokio::test]
async fn test_mark_read_is_visible_on_next_read() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 2).await;

    let page = f.service.list_notifications(&user.to_string()).await.unwrap();
    let target = page[0].notification_id;

    f.service
        .mark_read(&user.to_string(), &target.to_string())
        .await
        .unwrap();
    assert!(!f.cache.contains(user));

    let page = f.service.list_notifications(&user.to_string()).await.unwrap();
    // 已读的排在未读之后
    assert!(!page[0].read);
    assert_eq!(page[1].notification_id, target);
    assert!(page[1].read);
}

#[tokio::test]
async fn test_mark_all_read_twice_equals_once() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 3).await;
    let calls_before = f.cache.invalidate_calls();

    f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(f.service.mark_all_read(&user.to_string()).await.unwrap(), 3);
    let after_first = f.notifications.all();

    f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(f.service.mark_all_read(&user.to_string()).await.unwrap(), 0);
    let after_second = f.notifications.all();

    assert_eq!(after_first, after_second);
    assert!(after_second.iter().all(|n| n.read));
    // 两次调用都失效了缓存
    assert_eq!(f.cache.invalidate_calls(), calls_before + 2);
    assert!(!f.cache.contains(user));

    let page = f.service.list_notifications(&user.to_string()).await.unwrap();
    assert!(page.iter().all(|n| n.read));
}

#[tokio::test]
async fn test_mark_all_read_without_notifications_still_invalidates() {
    let f = fixture();
    let user = Uuid::new_v4();
    f.cache.prime(user, Vec::new());

    assert_eq!(f.service.mark_all_read(&user.to_string()).await.unwrap(), 0);
    assert!(!f.cache.contains(user));
}

#[tokio::test]
async fn test_mark_read_permission_and_not_found() {
    let f = fixture();
    let (owner, other, actor) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    f.notify(owner, actor, 1).await;
    let notification = f.notifications.all()[0].clone();

    let err = f
        .service
        .mark_read(&other.to_string(), &notification.notification_id.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, NotificationError::PermissionDenied { .. }));
    assert_eq!(tonic::Status::from(err).code(), Code::PermissionDenied);
    assert!(!f.notifications.all()[0].read);

    let err = f
        .service
        .mark_read(&owner.to_string(), &Uuid::new_v4().to_string())
        .await
        .unwrap_err();
    assert_eq!(tonic::Status::from(err).code(), Code::NotFound);
}

#[tokio::test]
async fn test_mark_read_reports_cache_failure() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 1).await;
    let id = f.notifications.all()[0].notification_id;

    f.cache.set_failing(true);
    let err = f
        .service
        .mark_read(&user.to_string(), &id.to_string())
        .await
        .unwrap_err();

    assert!(matches!(err, NotificationError::Cache(_)));
    assert_eq!(tonic::Status::from(err).code(), Code::Internal);
    // 数据库更新已经生效
    assert!(f.notifications.all()[0].read);
}

#[tokio::test]
async fn test_list_falls_back_to_store_when_cache_is_down() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 2).await;
    f.cache.set_failing(true);

    let page = f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_list_respects_page_size() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 35).await;

    let page = f.service.list_notifications(&user.to_string()).await.unwrap();
    assert_eq!(page.len(), 30);
}

#[tokio::test]
async fn test_mark_all_read_reinvalidates_page_refilled_by_slow_reader() {
    let f = fixture();
    let (user, actor) = (Uuid::new_v4(), Uuid::new_v4());
    f.notify(user, actor, 2).await;
    let service = NotificationService::new(f.notifications.clone(), f.cache.clone())
        .with_cache_reinvalidation(Duration::from_millis(20));

    // 慢读者在标记之前读到两条未读
    let before = service.list_notifications(&user.to_string()).await.unwrap();
    assert!(before.iter().all(|n| !n.read));

    assert_eq!(service.mark_all_read(&user.to_string()).await.unwrap(), 2);
    // 失效之后才回填旧页
    f.cache.prime(user, before);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!f.cache.contains(user));
    let after = service.list_notifications(&user.to_string()).await.unwrap();
    assert!(after.iter().all(|n| n.read));
}
