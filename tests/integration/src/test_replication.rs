//! Archive replication end-to-end tests.

#[cfg(test)]
mod tests {
    use zipdrop_core::{CallerIdentity, ErrorKind, JobStatus, ReplicationJob, ReportStatus};

    use crate::{
        ACCOUNT_ID, build_zip, cleanup_bucket, create_test_bucket, list_keys, orchestrator, put,
        request, s3_client,
    };

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_replicate_archive_into_empty_bucket() {
        let client = s3_client();
        let source = create_test_bucket(&client, "src").await;
        let target = create_test_bucket(&client, "site").await;
        put(
            &client,
            &source,
            "site.zip",
            build_zip(&[
                ("index.html", b"<h1>hello</h1>"),
                ("css/", b""),
                ("css/app.css", b"body{}"),
            ]),
        )
        .await;

        let report = orchestrator()
            .run(
                &CallerIdentity::Unrestricted,
                &request(vec![ReplicationJob::new(&source, "site.zip", &target)]),
            )
            .await
            .expect("invocation should run");

        assert_eq!(report.status, ReportStatus::Succeeded, "{report:?}");
        assert_eq!(report.outcomes[0].objects_written, 2);
        assert_eq!(list_keys(&client, &target).await, vec!["css/app.css", "index.html"]);

        let head = client
            .head_object()
            .bucket(&target)
            .key("index.html")
            .send()
            .await
            .expect("head_object");
        assert_eq!(head.content_type(), Some("text/html"));

        cleanup_bucket(&client, &source).await;
        cleanup_bucket(&client, &target).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_replace_stale_objects() {
        let client = s3_client();
        let source = create_test_bucket(&client, "src").await;
        let target = create_test_bucket(&client, "site").await;
        put(&client, &source, "site.zip", build_zip(&[("a.txt", b"fresh")])).await;
        put(&client, &target, "a.txt", b"stale".to_vec()).await;
        put(&client, &target, "old.txt", b"old".to_vec()).await;

        let report = orchestrator()
            .run(
                &CallerIdentity::Unrestricted,
                &request(vec![ReplicationJob::new(&source, "site.zip", &target)]),
            )
            .await
            .expect("invocation should run");

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, JobStatus::Succeeded, "{outcome:?}");
        assert_eq!(outcome.objects_deleted, 1);
        assert_eq!(list_keys(&client, &target).await, vec!["a.txt"]);

        let body = client
            .get_object()
            .bucket(&target)
            .key("a.txt")
            .send()
            .await
            .expect("get_object")
            .body
            .collect()
            .await
            .expect("collect body")
            .into_bytes();
        assert_eq!(body.as_ref(), b"fresh");

        cleanup_bucket(&client, &source).await;
        cleanup_bucket(&client, &target).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_isolate_missing_archive() {
        let client = s3_client();
        let source = create_test_bucket(&client, "src").await;
        let target = create_test_bucket(&client, "site").await;
        put(&client, &source, "good.zip", build_zip(&[("a.txt", b"a")])).await;

        let report = orchestrator()
            .run(
                &CallerIdentity::Unrestricted,
                &request(vec![
                    ReplicationJob::new(&source, "missing.zip", &target),
                    ReplicationJob::new(&source, "good.zip", &target),
                ]),
            )
            .await
            .expect("invocation should run");

        assert_eq!(report.status, ReportStatus::PartialFailure);
        assert_eq!(report.outcomes[0].status, JobStatus::Failed);
        assert_eq!(report.outcomes[0].errors[0].kind, ErrorKind::NotFound);
        assert_eq!(report.outcomes[1].status, JobStatus::Succeeded);
        assert_eq!(list_keys(&client, &target).await, vec!["a.txt"]);

        cleanup_bucket(&client, &source).await;
        cleanup_bucket(&client, &target).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_stream_large_entries() {
        let client = s3_client();
        let source = create_test_bucket(&client, "src").await;
        let target = create_test_bucket(&client, "site").await;
        let big: Vec<u8> = (0..2_000_000u32).map(|i| (i % 251) as u8).collect();
        put(
            &client,
            &source,
            "assets.zip",
            build_zip(&[("video.bin", &big), ("index.html", b"x")]),
        )
        .await;

        let report = orchestrator()
            .run(
                &CallerIdentity::Unrestricted,
                &request(vec![ReplicationJob::new(&source, "assets.zip", &target)]),
            )
            .await
            .expect("invocation should run");
        assert_eq!(report.status, ReportStatus::Succeeded, "{report:?}");

        let head = client
            .head_object()
            .bucket(&target)
            .key("video.bin")
            .send()
            .await
            .expect("head_object");
        assert_eq!(head.content_length(), Some(2_000_000));

        cleanup_bucket(&client, &source).await;
        cleanup_bucket(&client, &target).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_refuse_foreign_caller() {
        let client = s3_client();
        let target = create_test_bucket(&client, "site").await;

        let caller = CallerIdentity::from_invoked_arn(
            "arn:aws:lambda:us-east-1:000000000000:function:zipdrop:account-111111111111",
        );
        assert_ne!(caller, CallerIdentity::Account(ACCOUNT_ID.to_owned()));

        let err = orchestrator()
            .run(
                &caller,
                &request(vec![ReplicationJob::new("src", "site.zip", &target)]),
            )
            .await
            .expect_err("invocation should be refused");
        assert_eq!(err.kind(), "authorization");
        assert!(list_keys(&client, &target).await.is_empty());

        cleanup_bucket(&client, &target).await;
    }
}
