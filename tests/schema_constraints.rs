//! Constraint behaviour against a real PostgreSQL. Runs when ACADEMICO_TEST_DATABASE_URL is set;
//! each test migrates the catalog into its own schema.

use academico::{app_router, apply_migrations, catalog, resolve, with_schema_name, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::ServiceExt;

struct Harness {
    app: Router,
    pool: PgPool,
    schema: String,
}

async fn harness(name: &str) -> Option<Harness> {
    let Ok(url) = std::env::var("ACADEMICO_TEST_DATABASE_URL") else {
        eprintln!("ACADEMICO_TEST_DATABASE_URL not set; skipping {}", name);
        return None;
    };
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
    let schema = format!("academico_test_{}", name);
    sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema))
        .execute(&pool)
        .await
        .unwrap();
    let config = with_schema_name(catalog::builtin().unwrap(), &schema);
    apply_migrations(&pool, &config).await.unwrap();
    // A second run must be a no-op.
    apply_migrations(&pool, &config).await.unwrap();
    let model = resolve(&config).unwrap();
    Some(Harness {
        app: app_router(AppState::new(pool.clone(), model), 1024 * 1024),
        pool,
        schema,
    })
}

impl Harness {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(format!("/api/v1{}", uri));
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// POST and return the new row's id, failing the test on any other status.
    async fn create(&self, path: &str, body: Value) -> i64 {
        let (status, resp) = self.send("POST", &format!("/{}", path), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{} -> {}", path, resp);
        resp["data"]["id"].as_i64().unwrap()
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\".\"{}\"", self.schema, table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn pessoa(username: &str, papel: &str, unidade_id: i64) -> Value {
    json!({
        "username": username,
        "password": "s3nha",
        "first_name": username,
        "last_name": "Silva",
        "numero_matricula": format!("M-{}", username),
        "numero_documento": format!("D-{}", username),
        "papel": papel,
        "unidade_id": unidade_id,
    })
}

struct Campus {
    unidade: i64,
    professor: i64,
    aluno: i64,
    turma: i64,
    matricula: i64,
}

async fn campus(h: &Harness) -> Campus {
    let unidade = h.create("unidade", json!({ "nome": "Campus A" })).await;
    let departamento = h.create("departamento", json!({ "nome": "Computing", "unidade_id": unidade })).await;
    h.create("curso", json!({ "nome": "CS", "departamento_id": departamento, "duracao_semestres": 8 }))
        .await;
    let disciplina = h
        .create("disciplina", json!({ "nome": "Algoritmos", "peso": 4, "departamento_id": departamento }))
        .await;
    let semestre = h
        .create("semestre", json!({ "nome": "2025.1", "data_inicio": "2025-02-01", "data_fim": "2025-06-30" }))
        .await;
    let professor = h.create("pessoa", pessoa("prof", "professor", unidade)).await;
    let aluno = h.create("pessoa", pessoa("ana", "aluno", unidade)).await;
    let turma = h
        .create(
            "turma",
            json!({ "disciplina_id": disciplina, "professor_id": professor, "semestre_id": semestre, "capacidade": 40 }),
        )
        .await;
    let matricula = h.create("matricula", json!({ "aluno_id": aluno, "turma_id": turma })).await;
    let avaliacao = h
        .create("avaliacao", json!({ "turma_id": turma, "nome": "P1", "peso": "40.00", "data": "2025-04-10" }))
        .await;
    h.create("nota", json!({ "avaliacao_id": avaliacao, "matricula_id": matricula, "valor": "8.50" }))
        .await;
    h.create("frequencia", json!({ "matricula_id": matricula, "data": "2025-03-10", "situacao": "presente" }))
        .await;
    h.create("resultadofinal", json!({ "matricula_id": matricula })).await;
    Campus { unidade, professor, aluno, turma, matricula }
}

#[tokio::test]
async fn course_names_are_unique_per_department() {
    let Some(h) = harness("course_unique").await else { return };
    let unidade = h.create("unidade", json!({ "nome": "Campus A" })).await;
    let computing = h.create("departamento", json!({ "nome": "Computing", "unidade_id": unidade })).await;
    let cs = json!({ "nome": "CS", "departamento_id": computing, "duracao_semestres": 8 });
    let id = h.create("curso", cs.clone()).await;

    let (status, body) = h.send("POST", "/curso", Some(cs)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["constraint"], "curso_nome_departamento_id_key");

    let math = h.create("departamento", json!({ "nome": "Mathematics", "unidade_id": unidade })).await;
    h.create("curso", json!({ "nome": "CS", "departamento_id": math, "duracao_semestres": 8 }))
        .await;

    let (status, body) = h.send("GET", &format!("/curso/{}?include=departamento", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["_label"], "CS - Campus A");
    assert_eq!(body["data"]["departamento"]["nome"], "Computing");
}

#[tokio::test]
async fn unique_pairs_and_one_to_one_result() {
    let Some(h) = harness("unique_pairs").await else { return };
    let c = campus(&h).await;

    let (status, _) = h
        .send("POST", "/matricula", Some(json!({ "aluno_id": c.aluno, "turma_id": c.turma })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = h
        .send("POST", "/resultadofinal", Some(json!({ "matricula_id": c.matricula })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["constraint"], "resultado_final_matricula_id_key");

    let (status, _) = h.send("POST", "/unidade", Some(json!({ "nome": "Campus A" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // campus() already graded this enrollment on avaliacao 1.
    let (status, body) = h
        .send("POST", "/nota", Some(json!({ "avaliacao_id": 1, "matricula_id": c.matricula, "valor": "6.00" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["constraint"], "nota_avaliacao_id_matricula_id_key");

    let (status, body) = h
        .send("POST", "/departamento", Some(json!({ "nome": "Computing", "unidade_id": c.unidade })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["constraint"], "departamento_nome_unidade_id_key");
    let outra = h.create("unidade", json!({ "nome": "Campus B" })).await;
    h.create("departamento", json!({ "nome": "Computing", "unidade_id": outra })).await;
}

#[tokio::test]
async fn deleting_a_unit_cascades_to_everything_under_it() {
    let Some(h) = harness("unit_cascade").await else { return };
    let c = campus(&h).await;

    let (status, body) = h.send("GET", &format!("/unidade/{}/dependents", c.unidade), None).await;
    assert_eq!(status, StatusCode::OK);
    let deleted = body["data"]["deleted"].as_array().unwrap();
    let pessoas = deleted.iter().find(|r| r["entity"] == "pessoa").unwrap();
    assert_eq!(pessoas["count"], 2);

    let (status, _) = h.send("DELETE", &format!("/unidade/{}", c.unidade), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    for table in [
        "unidade", "pessoa", "departamento", "curso", "disciplina", "turma", "matricula",
        "frequencia", "avaliacao", "nota", "resultado_final",
    ] {
        assert_eq!(h.count(table).await, 0, "{}", table);
    }
    assert_eq!(h.count("semestre").await, 1);

    let (status, _) = h.send("DELETE", &format!("/unidade/{}", c.unidade), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_professor_keeps_the_class() {
    let Some(h) = harness("professor_set_null").await else { return };
    let c = campus(&h).await;

    let (status, body) = h.send("GET", &format!("/pessoa/{}/dependents", c.professor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nulled"][0]["entity"], "turma");
    assert_eq!(body["data"]["nulled"][0]["column"], "professor_id");

    let (status, _) = h.send("DELETE", &format!("/pessoa/{}", c.professor), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = h.send("GET", &format!("/turma/{}", c.turma), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["professor_id"], Value::Null);
    assert_eq!(h.count("matricula").await, 1);

    let (_, body) = h.send("GET", "/turma?professor_id__isnull=true", None).await;
    assert_eq!(body["meta"]["count"], 1);
}

#[tokio::test]
async fn roles_guard_class_and_enrollment_references() {
    let Some(h) = harness("role_guard").await else { return };
    let c = campus(&h).await;

    let (status, body) = h
        .send("PATCH", &format!("/turma/{}", c.turma), Some(json!({ "professor_id": c.aluno })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["message"].as_str().unwrap().contains("papel in [professor]"));

    let outro = h.create("turma", json!({ "disciplina_id": 1, "semestre_id": 1 })).await;
    let (status, _) = h
        .send("POST", "/matricula", Some(json!({ "aluno_id": c.professor, "turma_id": outro })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = h
        .send("PATCH", &format!("/pessoa/{}", c.professor), Some(json!({ "papel": "aluno" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = h
        .send("PATCH", &format!("/pessoa/{}", c.aluno), Some(json!({ "papel": "professor" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"].as_str().unwrap().contains("matricula"));
    let (_, body) = h.send("GET", &format!("/pessoa/{}", c.aluno), None).await;
    assert_eq!(body["data"]["papel"], "aluno");

    let (status, body) = h
        .send("PATCH", &format!("/pessoa/{}", c.professor), Some(json!({ "papel": "professor", "turno": "noite" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["turno"], "noite");
}

#[tokio::test]
async fn concurrent_role_change_cannot_strand_a_class() {
    let Some(h) = harness("role_race").await else { return };
    let c = campus(&h).await;

    for i in 0..20 {
        let professor = h.create("pessoa", pessoa(&format!("prof{}", i), "professor", c.unidade)).await;
        let turma = json!({ "disciplina_id": 1, "semestre_id": 1, "professor_id": professor });
        let pessoa_path = format!("/pessoa/{}", professor);
        let ((created, _), (demoted, _)) = tokio::join!(
            h.send("POST", "/turma", Some(turma)),
            h.send("PATCH", &pessoa_path, Some(json!({ "papel": "aluno" }))),
        );
        // Exactly one side wins: the class is created and the demotion refused, or the reverse.
        assert!(
            (created == StatusCode::CREATED && demoted == StatusCode::CONFLICT)
                || (created == StatusCode::UNPROCESSABLE_ENTITY && demoted == StatusCode::OK),
            "round {}: turma {} / pessoa {}",
            i,
            created,
            demoted
        );
    }

    let stranded: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM \"{0}\".turma t JOIN \"{0}\".pessoa p ON p.id = t.professor_id \
         WHERE p.papel::text <> 'professor'",
        h.schema
    ))
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(stranded, 0);
}

#[tokio::test]
async fn passwords_are_stored_hashed_and_never_returned() {
    let Some(h) = harness("password_hidden").await else { return };
    let unidade = h.create("unidade", json!({ "nome": "Campus B" })).await;
    let (status, body) = h.send("POST", "/pessoa", Some(pessoa("bia", "aluno", unidade))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"].get("password").is_none());
    assert_eq!(body["data"]["_label"], "Campus B - Silva, bia");
    assert_eq!(body["data"]["papel"], "aluno");

    let stored: String = sqlx::query_scalar(&format!("SELECT password FROM \"{}\".pessoa", h.schema))
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert!(stored.starts_with("sha256$"));
    assert_ne!(stored, "s3nha");
}
